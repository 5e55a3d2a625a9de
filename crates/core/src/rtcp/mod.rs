//! RTCP sender/receiver statistics loop (RFC 3550).
//!
//! [`packet`] is the wire codec for SR/RR/SDES/BYE; [`context`] holds the
//! per-flow statistics state machines. Each RTP flow gets one context:
//! sources drive a [`SenderContext`] from their send path and a periodic
//! timer (default 5 s), sinks drive a [`ReceiverContext`] from the receive
//! path.

pub mod context;
pub mod packet;

pub use context::{ReceiverContext, SenderContext};
pub use packet::{Bye, ReceiverReport, ReportBlock, RtcpPacket, SenderReport, SourceDescription};

use std::time::{SystemTime, UNIX_EPOCH};

/// Default RTCP report interval in milliseconds.
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 5000;

/// Wall-clock milliseconds since the Unix epoch.
///
/// The contexts take timestamps as arguments; this is the production
/// source for them.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
