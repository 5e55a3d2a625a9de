//! Per-track media-stream management and the stream-info registry.
//!
//! A [`MediaStream`] is created at SETUP for each track and owns that
//! track's packetizer, transport adapter, and sender-side RTCP context.
//! The owning session drives it: `play`/`pause`/`teardown` mirror the
//! session state machine, and `push_frame` is the application's feed in
//! the `PLAYING` state — a synchronous packetize-and-send with no internal
//! queueing or pacing (frame cadence belongs to the caller).
//!
//! The [`StreamRegistry`] is the read-mostly map of published stream
//! paths to their [`MediaStreamInfo`], consulted by DESCRIBE and SETUP.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::RngExt;

use crate::error::{Result, RtspError};
use crate::media::{Codec, MediaFrame, MediaStreamInfo, Packetizer, packetizer_for};
use crate::rtcp::{DEFAULT_REPORT_INTERVAL_MS, SenderContext, unix_now_ms};
use crate::session::transport::{TransportConfig, TransportKind};
use crate::transport::TransportAdapter;

/// Stream delivery state, advanced by the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Ready,
    Playing,
    Paused,
}

/// One track's send pipeline: packetizer → transport adapter, with RTCP
/// bookkeeping on the side.
pub struct MediaStream {
    track_uri: String,
    codec: Codec,
    state: StreamState,
    packetizer: Box<dyn Packetizer>,
    adapter: Box<dyn TransportAdapter>,
    rtcp: Arc<Mutex<SenderContext>>,
    rtcp_cname: String,
    rtcp_channel: Option<u8>,
    clock_rate: u32,
    last_report_ms: u64,
    report_interval_ms: u64,
}

impl MediaStream {
    /// Build the pipeline for a track. The adapter is not yet set up;
    /// call [`setup`](Self::setup) with the negotiated config.
    pub fn new(
        track_uri: &str,
        codec: Codec,
        payload_type: u8,
        clock_rate: u32,
        adapter: Box<dyn TransportAdapter>,
    ) -> Result<Self> {
        let ssrc = rand::rng().random::<u32>();
        let packetizer = packetizer_for(codec, payload_type, ssrc, clock_rate)?;
        Ok(Self {
            track_uri: track_uri.to_string(),
            codec,
            state: StreamState::Init,
            packetizer,
            adapter,
            rtcp: Arc::new(Mutex::new(SenderContext::new(ssrc))),
            rtcp_cname: format!("stream@{:08x}", ssrc),
            rtcp_channel: None,
            clock_rate,
            last_report_ms: 0,
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
        })
    }

    /// Bind the transport for the negotiated config.
    ///
    /// Adapter-allocated ports are written back into `config`.
    pub fn setup(&mut self, config: &mut TransportConfig) -> bool {
        if !self.adapter.setup(config) {
            return false;
        }
        if config.kind == TransportKind::TcpInterleaved {
            self.rtcp_channel = Some(config.rtcp_channel);
        }
        self.state = StreamState::Ready;
        tracing::info!(
            track = %self.track_uri,
            transport = %self.adapter.transport_info(),
            "stream set up"
        );
        true
    }

    pub fn play(&mut self) {
        if matches!(self.state, StreamState::Ready | StreamState::Paused) {
            self.state = StreamState::Playing;
        }
    }

    pub fn pause(&mut self) {
        if self.state == StreamState::Playing {
            self.state = StreamState::Paused;
        }
    }

    /// Close the transport and return to `Init`. A BYE goes out first on
    /// a best-effort basis.
    pub fn teardown(&mut self) {
        if self.state != StreamState::Init {
            let bye = self.rtcp.lock().build_bye("teardown");
            self.adapter.send_rtcp(&bye);
        }
        self.adapter.close();
        self.state = StreamState::Init;
        tracing::debug!(track = %self.track_uri, "stream torn down");
    }

    /// Packetize and send one access unit.
    ///
    /// Non-blocking: packets are handed to the adapter as they are
    /// produced, in sequence-number order. Fails unless the stream is
    /// `PLAYING`.
    pub fn push_frame(&mut self, frame: &MediaFrame) -> Result<()> {
        if self.state != StreamState::Playing {
            return Err(RtspError::InvalidState(match self.state {
                StreamState::Init => "INIT",
                StreamState::Ready => "READY",
                StreamState::Paused => "PAUSED",
                StreamState::Playing => unreachable!(),
            }));
        }

        let packets = self.packetizer.packetize(frame);
        let mut rtcp = self.rtcp.lock();
        for packet in &packets {
            let Some(wire) = packet.serialize() else {
                continue;
            };
            if !self.adapter.send_rtp(&wire) {
                tracing::warn!(track = %self.track_uri, "RTP send failed");
                return Err(RtspError::TransportNotConfigured(self.track_uri.clone()));
            }
            rtcp.on_rtp_sent(packet.timestamp, packet.payload.len());
        }
        drop(rtcp);

        self.maybe_send_report();
        Ok(())
    }

    /// Emit the periodic SR + SDES compound when the interval elapsed.
    fn maybe_send_report(&mut self) {
        let now = unix_now_ms();
        if now.saturating_sub(self.last_report_ms) < self.report_interval_ms {
            return;
        }
        self.last_report_ms = now;
        let compound = self.rtcp.lock().build_compound(&self.rtcp_cname, None, now);
        if self.adapter.send_rtcp(&compound) {
            tracing::trace!(track = %self.track_uri, "sender report sent");
        }
    }

    /// Feed inbound RTCP (receiver reports) to this track's context.
    pub fn handle_rtcp(&mut self, data: &[u8], now_ms: u64) {
        self.rtcp.lock().on_rtcp(data, now_ms);
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn track_uri(&self) -> &str {
        &self.track_uri
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Sequence number of the next RTP packet (for RTP-Info).
    pub fn next_sequence(&self) -> u16 {
        self.packetizer.next_sequence()
    }

    /// Current RTP timestamp (for RTP-Info).
    pub fn rtp_timestamp(&self) -> u32 {
        self.packetizer.last_timestamp()
    }

    /// RTCP interleaved channel when riding the control connection.
    pub fn rtcp_channel(&self) -> Option<u8> {
        self.rtcp_channel
    }

    /// Mean RTT over receivers that have reported, in milliseconds.
    pub fn average_rtt(&self) -> Option<u32> {
        self.rtcp.lock().average_rtt()
    }
}

/// Registry of published streams, keyed by path.
///
/// Read-mostly: DESCRIBE and SETUP look paths up on every request, while
/// registration happens once at startup.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<RwLock<HashMap<String, Arc<MediaStreamInfo>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a stream. Replaces any previous stream at the same path.
    pub fn add(&self, info: MediaStreamInfo) -> Arc<MediaStreamInfo> {
        let path = info.path.clone();
        let info = Arc::new(info);
        self.streams.write().insert(path.clone(), info.clone());
        tracing::info!(path, "stream registered");
        info
    }

    pub fn remove(&self, path: &str) -> Option<Arc<MediaStreamInfo>> {
        self.streams.write().remove(path)
    }

    pub fn get(&self, path: &str) -> Option<Arc<MediaStreamInfo>> {
        self.streams.read().get(path).cloned()
    }

    /// Resolve a stream from a full RTSP request URI.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<MediaStreamInfo>> {
        self.get(extract_stream_path(uri))
    }

    pub fn paths(&self) -> Vec<String> {
        self.streams.read().keys().cloned().collect()
    }
}

/// Extract the stream path from an RTSP URI.
///
/// `rtsp://host:8554/live/track1` → `/live`
/// `rtsp://host:8554/live`        → `/live`
/// `/camera1`                     → `/camera1`
pub fn extract_stream_path(uri: &str) -> &str {
    let path = if let Some(after) = uri.strip_prefix("rtsp://") {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        "/"
    };

    // Strip a track suffix: /live/track0 → /live
    match path.rfind("/track") {
        Some(pos) if pos > 0 => &path[..pos],
        _ => path,
    }
}
