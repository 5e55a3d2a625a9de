//! Connection-level message framing.
//!
//! An RTSP TCP connection multiplexes two syntaxes on one byte stream
//! (RFC 2326 §10.12): ASCII messages terminated by `CRLF CRLF` (plus a
//! `Content-Length` body), and binary interleaved frames introduced by
//! `'$'`:
//!
//! ```text
//! '$' | channel (u8) | length (u16 BE) | payload
//! ```
//!
//! [`decode`] inspects the first byte of the buffer to pick the syntax,
//! returns [`Decoded::Incomplete`] until a whole message is buffered, and
//! reports how many bytes it consumed so the caller can drain its buffer —
//! residual bytes may already contain the next (pipelined) message.

use crate::error::{ParseErrorKind, Result, RtspError};

use super::request::RtspRequest;
use super::response::RtspResponse;

/// Interleaved frame header: `'$'`, channel, 2-byte length.
pub const INTERLEAVED_MAGIC: u8 = b'$';
const INTERLEAVED_HEADER_LEN: usize = 4;

/// One message decoded from the stream.
#[derive(Debug)]
pub enum Decoded {
    /// More bytes are needed.
    Incomplete,
    /// A complete RTSP request; `consumed` bytes should be drained.
    Request { request: RtspRequest, consumed: usize },
    /// A complete RTSP response; `consumed` bytes should be drained.
    Response { response: RtspResponse, consumed: usize },
    /// A complete interleaved binary frame (RTP or RTCP by channel parity).
    Interleaved {
        channel: u8,
        payload: Vec<u8>,
        consumed: usize,
    },
}

/// Frame an interleaved payload for the control connection.
pub fn encode_interleaved(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(INTERLEAVED_HEADER_LEN + payload.len());
    frame.push(INTERLEAVED_MAGIC);
    frame.push(channel);
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Decode the next message from the front of `buf`.
///
/// Returns [`Decoded::Incomplete`] when the buffer holds a prefix of a
/// valid message, and `Err` when the prefix can never become one.
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    if buf.is_empty() {
        return Ok(Decoded::Incomplete);
    }

    if buf[0] == INTERLEAVED_MAGIC {
        if buf.len() < INTERLEAVED_HEADER_LEN {
            return Ok(Decoded::Incomplete);
        }
        let channel = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let total = INTERLEAVED_HEADER_LEN + length;
        if buf.len() < total {
            return Ok(Decoded::Incomplete);
        }
        return Ok(Decoded::Interleaved {
            channel,
            payload: buf[INTERLEAVED_HEADER_LEN..total].to_vec(),
            consumed: total,
        });
    }

    // ASCII message: locate the header terminator.
    let Some(header_end) = find_crlf_crlf(buf) else {
        return Ok(Decoded::Incomplete);
    };
    let head = std::str::from_utf8(&buf[..header_end]).map_err(|_| RtspError::Parse {
        kind: ParseErrorKind::InvalidHeader,
    })?;

    let content_length = parse_content_length(head)?;
    let total = header_end + 4 + content_length;
    if buf.len() < total {
        return Ok(Decoded::Incomplete);
    }

    let text_head = &buf[..header_end + 4];
    let body = &buf[header_end + 4..total];
    let mut text = String::from_utf8_lossy(text_head).into_owned();
    text.push_str(&String::from_utf8_lossy(body));

    if head.starts_with("RTSP/") {
        Ok(Decoded::Response {
            response: RtspResponse::parse(&text)?,
            consumed: total,
        })
    } else {
        Ok(Decoded::Request {
            request: RtspRequest::parse(&text)?,
            consumed: total,
        })
    }
}

fn find_crlf_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_content_length(head: &str) -> Result<usize> {
    for line in head.lines().skip(1) {
        if let Some(colon) = line.find(':') {
            let (name, value) = line.split_at(colon);
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                return value[1..]
                    .trim()
                    .parse()
                    .map_err(|_| RtspError::Parse {
                        kind: ParseErrorKind::InvalidContentLength,
                    });
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_without_blank_line() {
        let buf = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n";
        assert!(matches!(decode(buf).unwrap(), Decoded::Incomplete));
    }

    #[test]
    fn complete_request() {
        let buf = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        match decode(buf).unwrap() {
            Decoded::Request { request, consumed } => {
                assert_eq!(request.method, "OPTIONS");
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn request_with_body_needs_content_length_bytes() {
        let head = b"ANNOUNCE rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\n";
        assert!(matches!(decode(head).unwrap(), Decoded::Incomplete));

        let mut buf = head.to_vec();
        buf.extend_from_slice(b"v=0\r\n");
        match decode(&buf).unwrap() {
            Decoded::Request { request, consumed } => {
                assert_eq!(request.body.as_deref(), Some("v=0\r\n"));
                assert_eq!(consumed, buf.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pipelined_messages_report_consumed() {
        let mut buf = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n".to_vec();
        let second = b"TEARDOWN rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\n\r\n";
        buf.extend_from_slice(second);

        let consumed = match decode(&buf).unwrap() {
            Decoded::Request { consumed, .. } => consumed,
            other => panic!("unexpected: {other:?}"),
        };
        match decode(&buf[consumed..]).unwrap() {
            Decoded::Request { request, .. } => assert_eq!(request.method, "TEARDOWN"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn response_detected_by_version_prefix() {
        let buf = b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n";
        match decode(buf).unwrap() {
            Decoded::Response { response, .. } => assert_eq!(response.status_code, 200),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn interleaved_frame_roundtrip() {
        let payload = vec![0x80, 0x60, 0x00, 0x01, 0xAA];
        let frame = encode_interleaved(2, &payload);
        assert_eq!(frame[0], b'$');
        assert_eq!(frame[1], 2);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 5);

        match decode(&frame).unwrap() {
            Decoded::Interleaved {
                channel,
                payload: p,
                consumed,
            } => {
                assert_eq!(channel, 2);
                assert_eq!(p, payload);
                assert_eq!(consumed, frame.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn partial_interleaved_frame_incomplete() {
        let frame = encode_interleaved(0, &[1, 2, 3, 4]);
        assert!(matches!(decode(&frame[..3]).unwrap(), Decoded::Incomplete));
        assert!(matches!(decode(&frame[..6]).unwrap(), Decoded::Incomplete));
    }

    #[test]
    fn interleaved_then_ascii() {
        let mut buf = encode_interleaved(1, &[9, 9]);
        buf.extend_from_slice(b"OPTIONS * RTSP/1.0\r\nCSeq: 7\r\n\r\n");

        let consumed = match decode(&buf).unwrap() {
            Decoded::Interleaved { consumed, .. } => consumed,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(matches!(
            decode(&buf[consumed..]).unwrap(),
            Decoded::Request { .. }
        ));
    }

    #[test]
    fn bad_content_length_is_malformed() {
        let buf = b"DESCRIBE rtsp://h/s RTSP/1.0\r\nContent-Length: nope\r\n\r\n";
        assert!(decode(buf).is_err());
    }
}
