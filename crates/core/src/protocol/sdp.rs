//! SDP generation and parsing (RFC 4566).
//!
//! The server side produces the DESCRIBE body:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- 0 0 IN IP4 <addr>                        ← origin
//! s=RTSP Session                               ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=range:npt=0-                               ← open-ended live range
//! a=control:*                                  ← aggregate control
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...           ← codec parameters
//! a=control:track0                             ← track control URL
//! ```
//!
//! Per-codec `fmtp` handling follows RFC 6184 (H.264 `sprop-parameter-sets`),
//! RFC 7798 (H.265 `sprop-vps/sps/pps`), and RFC 3640 (AAC-hbr with a
//! 16-bit AudioSpecificConfig). Base64 has no line wrapping; hex is
//! lowercase.
//!
//! The client side extracts per-track payload type, codec, clock rate, and
//! control URL from a DESCRIBE body.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Result, RtspError};
use crate::media::{Codec, MediaStreamInfo};

/// Generate the SDP session description for a registered stream.
pub fn generate_sdp(info: &MediaStreamInfo, server_ip: &str) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!("o=- 0 0 IN IP4 {}\r\n", server_ip));
    sdp.push_str("s=RTSP Session\r\n");
    sdp.push_str(&format!("c=IN IP4 {}\r\n", server_ip));
    sdp.push_str("t=0 0\r\n");
    sdp.push_str("a=range:npt=0-\r\n");
    sdp.push_str("a=control:*\r\n");

    for (index, track) in info.tracks().iter().enumerate() {
        sdp.push_str(&track_sdp(track, index));
    }
    sdp
}

fn track_sdp(track: &MediaStreamInfo, index: usize) -> String {
    let mut sdp = String::new();
    let pt = track.payload_type;

    match track.codec {
        Some(Codec::H264) => {
            sdp.push_str(&format!("m=video 0 RTP/AVP {}\r\n", pt));
            sdp.push_str(&format!("a=rtpmap:{} H264/{}\r\n", pt, track.clock_rate));
            if let (Some(sps), Some(pps)) = (&track.sps, &track.pps) {
                // profile-level-id: SPS bytes 1..3 (RFC 6184 §8.1)
                let profile = if sps.len() >= 4 {
                    format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3])
                } else {
                    "42001f".to_string()
                };
                sdp.push_str(&format!(
                    "a=fmtp:{} packetization-mode=1;profile-level-id={};sprop-parameter-sets={},{}\r\n",
                    pt,
                    profile,
                    BASE64_STANDARD.encode(sps),
                    BASE64_STANDARD.encode(pps)
                ));
            }
        }
        Some(Codec::H265) => {
            sdp.push_str(&format!("m=video 0 RTP/AVP {}\r\n", pt));
            sdp.push_str(&format!("a=rtpmap:{} H265/{}\r\n", pt, track.clock_rate));
            if let (Some(vps), Some(sps), Some(pps)) = (&track.vps, &track.sps, &track.pps) {
                sdp.push_str(&format!(
                    "a=fmtp:{} sprop-vps={};sprop-sps={};sprop-pps={}\r\n",
                    pt,
                    BASE64_STANDARD.encode(vps),
                    BASE64_STANDARD.encode(sps),
                    BASE64_STANDARD.encode(pps)
                ));
            }
        }
        Some(Codec::Aac) => {
            sdp.push_str(&format!("m=audio 0 RTP/AVP {}\r\n", pt));
            sdp.push_str(&format!(
                "a=rtpmap:{} mpeg4-generic/{}/{}\r\n",
                pt, track.sample_rate, track.channels
            ));
            sdp.push_str(&format!(
                "a=fmtp:{} streamtype=5;profile-level-id=1;mode=AAC-hbr;sizelength=13;\
                 indexlength=3;indexdeltalength=3;config={:04x}\r\n",
                pt,
                audio_specific_config(track.sample_rate, track.channels)
            ));
        }
        Some(Codec::Mp2t) => {
            // Static payload type 33; no rtpmap required (RFC 3551).
            sdp.push_str(&format!("m=video 0 RTP/AVP {}\r\n", pt));
        }
        None => return sdp,
    }

    if track.kind == "video" && track.width > 0 && track.height > 0 {
        sdp.push_str(&format!("a=framerate:{}\r\n", track.frame_rate));
    }
    sdp.push_str(&format!("a=control:track{}\r\n", index));
    sdp
}

/// The 16-bit AudioSpecificConfig for AAC-LC:
/// profile (5 bits) | sampling-frequency-index (4) | channel-config (4) | pad (3).
fn audio_specific_config(sample_rate: u32, channels: u32) -> u16 {
    let freq_index = match sample_rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        _ => 15,
    };
    (2u16 << 11) | ((freq_index as u16) << 7) | ((channels as u16) << 3)
}

/// One `m=` section extracted from a DESCRIBE body.
#[derive(Debug, Clone, Default)]
pub struct SdpTrack {
    /// `"video"` or `"audio"`.
    pub kind: String,
    pub payload_type: u8,
    pub codec: Option<Codec>,
    pub clock_rate: u32,
    pub channels: u32,
    /// Track-level `a=control:` value, absolute or relative.
    pub control: Option<String>,
    /// Raw `a=fmtp:` parameters, if present.
    pub fmtp: Option<String>,
}

/// Parsed DESCRIBE body.
#[derive(Debug, Clone, Default)]
pub struct SdpSession {
    /// Session-level `a=control:` value (`*` denotes aggregate control).
    pub session_control: Option<String>,
    pub tracks: Vec<SdpTrack>,
}

/// Parse the SDP body of a DESCRIBE response.
///
/// Extracts each `m=` media line, the matching `a=rtpmap`, `a=control`
/// and `a=fmtp` attributes, and the session-level control URL. Payload
/// type 33 with no rtpmap defaults to MPEG-2 TS per RFC 3551.
pub fn parse_sdp(body: &str) -> Result<SdpSession> {
    let mut session = SdpSession::default();
    let mut current: Option<SdpTrack> = None;

    for raw_line in body.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }
        let value = &line[2..];

        match line.as_bytes()[0] {
            b'm' => {
                if let Some(track) = current.take() {
                    session.tracks.push(track);
                }
                current = parse_media_line(value);
            }
            b'a' => {
                if let Some(control) = value.strip_prefix("control:") {
                    let control = control.trim().to_string();
                    match current.as_mut() {
                        Some(track) => track.control = Some(control),
                        None => session.session_control = Some(control),
                    }
                } else if let Some(rtpmap) = value.strip_prefix("rtpmap:") {
                    if let Some(track) = current.as_mut() {
                        apply_rtpmap(track, rtpmap);
                    }
                } else if let Some(fmtp) = value.strip_prefix("fmtp:") {
                    if let Some(track) = current.as_mut() {
                        track.fmtp = Some(fmtp.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(track) = current.take() {
        session.tracks.push(track);
    }

    // Payload type 33 without an rtpmap is MPEG-2 TS (RFC 3551 table 5).
    for track in &mut session.tracks {
        if track.codec.is_none() && track.payload_type == 33 {
            track.codec = Some(Codec::Mp2t);
            track.clock_rate = 90000;
        }
    }

    if session.tracks.is_empty() {
        return Err(RtspError::SdpParse("no media sections".to_string()));
    }
    Ok(session)
}

/// `m=<media> <port> <proto> <fmt>` → a track skeleton.
fn parse_media_line(value: &str) -> Option<SdpTrack> {
    let mut parts = value.split_whitespace();
    let kind = parts.next()?;
    let _port = parts.next()?;
    let proto = parts.next()?;
    let pt = parts.next()?.parse().ok()?;

    if !proto.starts_with("RTP/AVP") || (kind != "video" && kind != "audio") {
        return None;
    }
    Some(SdpTrack {
        kind: kind.to_string(),
        payload_type: pt,
        ..Default::default()
    })
}

/// `a=rtpmap:<pt> <encoding>/<clock>[/<channels>]`.
fn apply_rtpmap(track: &mut SdpTrack, rtpmap: &str) {
    let mut parts = rtpmap.split_whitespace();
    let Some(pt) = parts.next().and_then(|p| p.parse::<u8>().ok()) else {
        return;
    };
    if pt != track.payload_type {
        return;
    }
    let Some(encoding) = parts.next() else { return };

    let mut pieces = encoding.split('/');
    let name = pieces.next().unwrap_or("");
    track.codec = Codec::from_encoding(name);
    track.clock_rate = pieces.next().and_then(|c| c.parse().ok()).unwrap_or(90000);
    track.channels = pieces.next().and_then(|c| c.parse().ok()).unwrap_or(0);
}

/// Resolve a track control URL against the base URL (RFC 2326 §C.1.1).
///
/// - `*` or empty selects the base (aggregate) URL;
/// - absolute `rtsp://` URLs are used as-is;
/// - anything else is appended to the base, normalized to one `/`.
pub fn resolve_control_url(base_url: &str, control: &str) -> String {
    if control.is_empty() || control == "*" {
        return base_url.trim_end_matches('/').to_string();
    }
    if control.starts_with("rtsp://") {
        return control.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_h264_sdp() {
        let sps = vec![0x67, 0x42, 0x00, 0x1f, 0xaa, 0xbb];
        let pps = vec![0x68, 0xce, 0x3c, 0x80];
        let info = MediaStreamInfo::h264("/live", sps.clone(), pps.clone());
        let sdp = generate_sdp(&info, "192.168.1.100");

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 0 0 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=RTSP Session\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("a=range:npt=0-\r\n"));
        assert!(sdp.contains("a=control:*\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        let expected_fmtp = format!(
            "a=fmtp:96 packetization-mode=1;profile-level-id=42001f;sprop-parameter-sets={},{}\r\n",
            BASE64_STANDARD.encode(&sps),
            BASE64_STANDARD.encode(&pps)
        );
        assert!(sdp.contains(&expected_fmtp));
        assert!(sdp.contains("a=control:track0\r\n"));

        // rtpmap must precede fmtp (RFC 6184 §8.2.1); session attrs precede m=
        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        let fmtp_idx = sdp.find("a=fmtp").unwrap();
        let m_idx = sdp.find("m=video").unwrap();
        assert!(rtpmap_idx < fmtp_idx);
        assert!(sdp.find("a=control:*").unwrap() < m_idx);
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn generates_h265_sprop_attributes() {
        let info = MediaStreamInfo::h265("/cam", vec![0x40, 0x01], vec![0x42, 0x01], vec![0x44, 0x01]);
        let sdp = generate_sdp(&info, "10.0.0.1");
        assert!(sdp.contains("a=rtpmap:98 H265/90000\r\n"));
        assert!(sdp.contains("sprop-vps="));
        assert!(sdp.contains("sprop-sps="));
        assert!(sdp.contains("sprop-pps="));
    }

    #[test]
    fn generates_aac_config() {
        let info = MediaStreamInfo::aac("/audio", 44100, 2);
        let sdp = generate_sdp(&info, "10.0.0.1");
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\n"));
        assert!(sdp.contains("a=rtpmap:97 mpeg4-generic/44100/2\r\n"));
        // AAC-LC, 44100 Hz (index 4), 2 channels: (2<<11)|(4<<7)|(2<<3) = 0x1210
        assert!(sdp.contains("config=1210\r\n"), "sdp: {sdp}");
        assert!(sdp.contains("mode=AAC-hbr"));
        assert!(sdp.contains("sizelength=13"));
    }

    #[test]
    fn generates_mp2t_without_rtpmap() {
        let info = MediaStreamInfo::mp2t("/ts");
        let sdp = generate_sdp(&info, "10.0.0.1");
        assert!(sdp.contains("m=video 0 RTP/AVP 33\r\n"));
        assert!(!sdp.contains("a=rtpmap:33"));
    }

    #[test]
    fn generates_multi_track() {
        let video = MediaStreamInfo::h264("video", vec![0x67, 1, 2, 3], vec![0x68, 1]);
        let audio = MediaStreamInfo::aac("audio", 48000, 2);
        let info = MediaStreamInfo::multi("/av", vec![video, audio]);
        let sdp = generate_sdp(&info, "10.0.0.1");
        assert!(sdp.contains("a=control:track0\r\n"));
        assert!(sdp.contains("a=control:track1\r\n"));
        assert!(sdp.find("m=video").unwrap() < sdp.find("m=audio").unwrap());
    }

    #[test]
    fn parse_roundtrip_of_generated_sdp() {
        let info = MediaStreamInfo::h264("/live", vec![0x67, 0x42, 0x00, 0x1f], vec![0x68, 0xce]);
        let sdp = generate_sdp(&info, "127.0.0.1");
        let parsed = parse_sdp(&sdp).unwrap();
        assert_eq!(parsed.session_control.as_deref(), Some("*"));
        assert_eq!(parsed.tracks.len(), 1);
        let track = &parsed.tracks[0];
        assert_eq!(track.kind, "video");
        assert_eq!(track.payload_type, 96);
        assert_eq!(track.codec, Some(Codec::H264));
        assert_eq!(track.clock_rate, 90000);
        assert_eq!(track.control.as_deref(), Some("track0"));
        assert!(track.fmtp.as_deref().unwrap().contains("packetization-mode=1"));
    }

    #[test]
    fn parse_defaults_pt33_to_mp2t() {
        let sdp = "v=0\r\ns=x\r\nm=video 0 RTP/AVP 33\r\na=control:track0\r\n";
        let parsed = parse_sdp(sdp).unwrap();
        assert_eq!(parsed.tracks[0].codec, Some(Codec::Mp2t));
        assert_eq!(parsed.tracks[0].clock_rate, 90000);
    }

    #[test]
    fn parse_audio_channels() {
        let sdp = "v=0\r\nm=audio 0 RTP/AVP 97\r\na=rtpmap:97 mpeg4-generic/48000/2\r\n";
        let parsed = parse_sdp(sdp).unwrap();
        let track = &parsed.tracks[0];
        assert_eq!(track.codec, Some(Codec::Aac));
        assert_eq!(track.clock_rate, 48000);
        assert_eq!(track.channels, 2);
    }

    #[test]
    fn parse_no_media_is_error() {
        assert!(parse_sdp("v=0\r\ns=empty\r\n").is_err());
    }

    #[test]
    fn control_url_resolution() {
        assert_eq!(resolve_control_url("rtsp://h/s", "*"), "rtsp://h/s");
        assert_eq!(resolve_control_url("rtsp://h/s/", ""), "rtsp://h/s");
        assert_eq!(
            resolve_control_url("rtsp://h/s", "rtsp://other/t"),
            "rtsp://other/t"
        );
        assert_eq!(resolve_control_url("rtsp://h/s", "track0"), "rtsp://h/s/track0");
        assert_eq!(resolve_control_url("rtsp://h/s/", "track0"), "rtsp://h/s/track0");
    }
}
