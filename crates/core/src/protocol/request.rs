use crate::error::{ParseErrorKind, Result, RtspError};

/// Methods this stack understands (RFC 2326 §10), in the order advertised
/// by the OPTIONS `Public` header.
pub const METHODS: &[&str] = &[
    "OPTIONS",
    "DESCRIBE",
    "SETUP",
    "PLAY",
    "PAUSE",
    "TEARDOWN",
    "GET_PARAMETER",
    "SET_PARAMETER",
    "ANNOUNCE",
    "RECORD",
    "REDIRECT",
];

/// RTSP protocol version string.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2; serialization
/// preserves insertion order. Byte-accurate body framing (Content-Length)
/// is handled by [`codec`](crate::protocol::codec) — [`parse`](Self::parse)
/// expects one complete message.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`header`](Self::header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Optional message body (e.g. SDP for ANNOUNCE).
    pub body: Option<String>,
}

impl RtspRequest {
    /// Start building a request for the client side.
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: RTSP_VERSION.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Parse an RTSP request from its text representation.
    ///
    /// Expects a complete message (request line, headers, blank line,
    /// optional body). Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(idx) => (&raw[..idx], &raw[idx + 4..]),
            None => (raw, ""),
        };

        let mut lines = head.lines();
        let request_line = lines.next().filter(|l| !l.is_empty()).ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }
        if !parts[2].starts_with("RTSP/") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidVersion,
            });
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            ));
        }

        Ok(RtspRequest {
            method: parts[0].to_string(),
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// `Content-Length` is appended automatically when a body is present
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if let Some(body) = &self.body {
            out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            out.push_str(body);
        } else {
            out.push_str("\r\n");
        }
        out
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.header("CSeq")
    }

    /// Session ID with any `;timeout=` suffix stripped
    /// (`"F42364D7;timeout=65"` → `"F42364D7"`).
    pub fn session_id(&self) -> Option<String> {
        self.header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/track0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(
            req.header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_request_with_body() {
        let raw = "ANNOUNCE rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.body.as_deref(), Some("v=0\r\n"));
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn parse_invalid_version() {
        assert!(RtspRequest::parse("OPTIONS * HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.header("CSeq"), Some("42"));
        assert_eq!(req.header("cseq"), Some("42"));
        assert_eq!(req.header("CSEQ"), Some("42"));
    }

    #[test]
    fn session_id_strips_timeout() {
        let req = RtspRequest::new("PLAY", "rtsp://h/s").add_header("Session", "ABC123;timeout=60");
        assert_eq!(req.session_id(), Some("ABC123".to_string()));
    }

    #[test]
    fn serialize_roundtrip() {
        let req = RtspRequest::new("DESCRIBE", "rtsp://h:8554/live")
            .add_header("CSeq", "2")
            .add_header("Accept", "application/sdp");
        let wire = req.serialize();
        assert!(wire.starts_with("DESCRIBE rtsp://h:8554/live RTSP/1.0\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));

        let parsed = RtspRequest::parse(&wire).unwrap();
        assert_eq!(parsed.method, "DESCRIBE");
        assert_eq!(parsed.header("Accept"), Some("application/sdp"));
    }

    #[test]
    fn serialize_adds_content_length() {
        let req = RtspRequest::new("SET_PARAMETER", "rtsp://h/s").with_body("x: 1\r\n".to_string());
        let wire = req.serialize();
        assert!(wire.contains("Content-Length: 6\r\n"));
        assert!(wire.ends_with("x: 1\r\n"));
    }
}
