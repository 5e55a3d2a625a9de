//! Transport adapters carrying RTP/RTCP for one track.
//!
//! RTSP negotiates one of two lower layers at SETUP:
//!
//! - **UDP** ([`udp`]): a pair of datagram sockets, RTP on an even port
//!   and RTCP on the next odd one (RFC 3550 §11).
//! - **TCP-interleaved** ([`tcp`]): binary frames multiplexed onto the
//!   RTSP control connection with `$` framing (RFC 2326 §10.12).
//!
//! Both present the same [`TransportAdapter`] surface so sessions and
//! stream managers never branch on the transport kind. Sends on a closed
//! adapter fail cleanly by returning `false`.

pub mod tcp;
pub mod udp;

use crate::session::transport::TransportConfig;

pub use tcp::TcpInterleavedAdapter;
pub use udp::UdpTransportAdapter;

/// Uniform send/receive surface over UDP and TCP-interleaved transports.
pub trait TransportAdapter: Send {
    /// Bind sockets / validate channels for the negotiated config.
    ///
    /// Ports the adapter allocates (server pair for sources, client pair
    /// for sinks) are written back into `config` for the SETUP exchange.
    fn setup(&mut self, config: &mut TransportConfig) -> bool;

    /// Ship one RTP packet; `false` when closed or the send fails.
    fn send_rtp(&self, data: &[u8]) -> bool;

    /// Ship one RTCP packet; `false` when closed, disabled, or failing.
    fn send_rtcp(&self, data: &[u8]) -> bool;

    /// Release sockets; subsequent sends return `false`.
    fn close(&mut self);

    /// The `Transport` description of this adapter for logging and the
    /// SETUP reply.
    fn transport_info(&self) -> String;

    fn is_active(&self) -> bool;
}

/// Receive-side callbacks for sink adapters.
///
/// Implemented by the client's RTP sink session; invoked from the
/// adapter's datagram-receive task. Kept behind `Arc` so a closed adapter
/// can drop its handler without tearing down the session.
pub trait RtpHandler: Send + Sync {
    fn on_rtp(&self, data: &[u8]);
    fn on_rtcp(&self, data: &[u8]);
}
