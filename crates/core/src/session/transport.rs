//! Transport negotiation (RFC 2326 §12.39).
//!
//! SETUP carries the client's proposal in the `Transport` header; the two
//! recognized forms are:
//!
//! ```text
//! Transport: RTP/AVP;unicast;client_port=8000-8001
//! Transport: RTP/AVP/TCP;unicast;interleaved=0-1
//! ```
//!
//! The negotiated result ([`TransportConfig`]) carries both sides' ports
//! (or channel numbers) plus the adapter role, and renders the mirrored
//! `Transport` response header.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Result, RtspError};

/// Lower-layer carrying the RTP flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Unicast UDP with separate RTP/RTCP datagram sockets.
    Udp,
    /// Interleaved binary frames on the RTSP control connection
    /// (RFC 2326 §10.12).
    TcpInterleaved,
}

/// Whether the adapter sends media (server) or receives it (client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRole {
    Source,
    Sink,
}

/// A parsed client `Transport` proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    pub kind: TransportKind,
    /// Client's RTP receive port (UDP only).
    pub client_rtp_port: u16,
    /// Client's RTCP port; 0 disables RTCP (UDP only).
    pub client_rtcp_port: u16,
    /// Proposed interleaved channel pair (TCP only).
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
}

impl TransportSpec {
    /// Parse a `Transport` header value.
    ///
    /// Multicast and non-RTP profiles are rejected with
    /// [`RtspError::UnsupportedTransport`]; so are interleaved channel
    /// pairs that violate the even/odd pairing rule.
    pub fn parse(header: &str) -> Result<Self> {
        let unsupported = |msg: &str| RtspError::UnsupportedTransport(msg.to_string());

        let mut parts = header.split(';').map(str::trim);
        let profile = parts.next().unwrap_or("");
        if !profile.starts_with("RTP/AVP") {
            return Err(unsupported(profile));
        }
        let tcp = profile == "RTP/AVP/TCP";

        let mut spec = TransportSpec {
            kind: if tcp {
                TransportKind::TcpInterleaved
            } else {
                TransportKind::Udp
            },
            client_rtp_port: 0,
            client_rtcp_port: 0,
            rtp_channel: 0,
            rtcp_channel: 1,
        };

        for part in parts {
            if part == "multicast" {
                return Err(unsupported("multicast"));
            }
            if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = parse_pair(ports).ok_or_else(|| unsupported(part))?;
                spec.client_rtp_port = rtp;
                spec.client_rtcp_port = rtcp;
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                let (rtp, rtcp) = parse_pair(channels).ok_or_else(|| unsupported(part))?;
                spec.rtp_channel = rtp as u8;
                spec.rtcp_channel = rtcp as u8;
            }
        }

        match spec.kind {
            TransportKind::Udp if spec.client_rtp_port == 0 => {
                Err(unsupported("missing client_port"))
            }
            TransportKind::TcpInterleaved
                if spec.rtp_channel % 2 != 0 || spec.rtcp_channel != spec.rtp_channel + 1 =>
            {
                Err(unsupported("interleaved channels must be an even/odd pair"))
            }
            _ => Ok(spec),
        }
    }
}

fn parse_pair(s: &str) -> Option<(u16, u16)> {
    let (a, b) = s.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Negotiated transport parameters for one track, fixed at SETUP.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub role: TransportRole,
    /// Peer address media is sent to (source) or expected from (sink).
    pub peer_ip: IpAddr,
    pub client_rtp_port: u16,
    /// 0 disables RTCP for this track.
    pub client_rtcp_port: u16,
    pub server_rtp_port: u16,
    pub server_rtcp_port: u16,
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
}

impl TransportConfig {
    pub fn from_spec(spec: &TransportSpec, role: TransportRole, peer_ip: IpAddr) -> Self {
        Self {
            kind: spec.kind,
            role,
            peer_ip,
            client_rtp_port: spec.client_rtp_port,
            client_rtcp_port: spec.client_rtcp_port,
            server_rtp_port: 0,
            server_rtcp_port: 0,
            rtp_channel: spec.rtp_channel,
            rtcp_channel: spec.rtcp_channel,
        }
    }

    pub fn rtcp_enabled(&self) -> bool {
        match self.kind {
            TransportKind::Udp => self.client_rtcp_port != 0,
            TransportKind::TcpInterleaved => true,
        }
    }

    /// The mirrored `Transport` header for the SETUP response.
    pub fn response_header(&self) -> String {
        match self.kind {
            TransportKind::Udp => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                self.client_rtp_port,
                self.client_rtcp_port,
                self.server_rtp_port,
                self.server_rtcp_port
            ),
            TransportKind::TcpInterleaved => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                self.rtp_channel, self.rtcp_channel
            ),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Udp,
            role: TransportRole::Source,
            peer_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            client_rtp_port: 0,
            client_rtcp_port: 0,
            server_rtp_port: 0,
            server_rtcp_port: 0,
            rtp_channel: 0,
            rtcp_channel: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_transport() {
        let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=5004-5005").unwrap();
        assert_eq!(spec.kind, TransportKind::Udp);
        assert_eq!(spec.client_rtp_port, 5004);
        assert_eq!(spec.client_rtcp_port, 5005);
    }

    #[test]
    fn parse_tcp_interleaved() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(spec.kind, TransportKind::TcpInterleaved);
        assert_eq!(spec.rtp_channel, 2);
        assert_eq!(spec.rtcp_channel, 3);
    }

    #[test]
    fn reject_odd_rtp_channel() {
        assert!(TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=1-2").is_err());
    }

    #[test]
    fn reject_unpaired_channels() {
        assert!(TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=0-2").is_err());
    }

    #[test]
    fn reject_multicast() {
        assert!(TransportSpec::parse("RTP/AVP;multicast;port=5000-5001").is_err());
    }

    #[test]
    fn reject_udp_without_client_port() {
        assert!(TransportSpec::parse("RTP/AVP;unicast").is_err());
    }

    #[test]
    fn reject_foreign_profile() {
        assert!(TransportSpec::parse("RAW/RAW/UDP;unicast").is_err());
    }

    #[test]
    fn udp_response_header() {
        let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=5004-5005").unwrap();
        let mut config =
            TransportConfig::from_spec(&spec, TransportRole::Source, "10.0.0.2".parse().unwrap());
        config.server_rtp_port = 6000;
        config.server_rtcp_port = 6001;
        assert_eq!(
            config.response_header(),
            "RTP/AVP;unicast;client_port=5004-5005;server_port=6000-6001"
        );
        assert!(config.rtcp_enabled());
    }

    #[test]
    fn tcp_response_header() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        let config =
            TransportConfig::from_spec(&spec, TransportRole::Source, "10.0.0.2".parse().unwrap());
        assert_eq!(config.response_header(), "RTP/AVP/TCP;unicast;interleaved=0-1");
    }
}
