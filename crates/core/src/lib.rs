//! # rtsp — RTSP/RTP/RTCP streaming stack
//!
//! Both ends of the Real-Time Streaming Protocol: a server that accepts
//! clients, negotiates media sessions, and streams packetized media, and a
//! client that discovers a remote stream, establishes transport, and
//! reassembles elementary-stream frames.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Message codec, session state machines, transport negotiation, `$`-interleaving |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet formats, SSRC/sequence semantics, SR/RR statistics |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | DESCRIBE body generation and parsing |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 payload | Single NAL / FU-A packetization, `sprop-parameter-sets` |
//! | [RFC 7798](https://tools.ietf.org/html/rfc7798) | H.265 payload | Single NAL / FU packetization, `sprop-vps/sps/pps` |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC payload | AAC-hbr AU headers, AudioSpecificConfig fmtp |
//! | [RFC 2250](https://tools.ietf.org/html/rfc2250) | MPEG-2 TS payload | 188-byte packet runs on payload type 33 |
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  Server / RtspClient  — orchestrators          │
//! ├────────────────────────────────────────────────┤
//! │  Protocol   — message codec, handler, SDP      │
//! │  Session    — state machines, registries       │
//! │  Stream     — per-track packetize-and-send     │
//! ├────────────────────────────────────────────────┤
//! │  Transport  — UDP port pairs, TCP interleaving │
//! │  Media      — RTP codec, (de)packetizers       │
//! │  Rtcp       — SR/RR/SDES/BYE, loss/jitter/RTT  │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start (server)
//!
//! ```no_run
//! use rtsp::{MediaStreamInfo, Server};
//!
//! let mut server = Server::new("0.0.0.0:8554");
//! server.add_stream(MediaStreamInfo::h264(
//!     "/live",
//!     vec![0x67, 0x42, 0x00, 0x1f],
//!     vec![0x68, 0xce, 0x3c, 0x80],
//! ));
//! server.start().unwrap();
//! // feed frames via server.push_frame("/live", &frame)
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — high-level [`Server`] orchestrator and [`ServerConfig`].
//! - [`client`] — [`RtspClient`], handshake driver, and sink session.
//! - [`protocol`] — RTSP request/response codec, method handling, SDP.
//! - [`session`] — server session state machine and transport negotiation.
//! - [`stream`] — per-track media pipelines and the stream registry.
//! - [`transport`] — UDP adapters, TCP signaling, interleaved framing.
//! - [`media`] — RTP packet codec and the packetizer/depacketizer family.
//! - [`rtcp`] — sender/receiver report engine.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod rtcp;
pub mod server;
pub mod session;
pub mod stream;
pub mod transport;

pub use client::{ClientListener, RtspClient};
pub use error::{Result, RtspError};
pub use media::{Codec, MediaFrame, MediaStreamInfo};
pub use protocol::{RtspRequest, RtspResponse};
pub use server::{Server, ServerConfig, Viewer};
pub use session::{SessionManager, SessionState};
pub use stream::{MediaStream, StreamRegistry};
