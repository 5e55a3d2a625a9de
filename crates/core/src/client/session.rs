//! Client-side media session: sink transport, depacketizer, RTCP.
//!
//! Created once DESCRIBE yields a usable SDP. The session allocates local
//! ports (UDP) or channel numbers (TCP-interleaved) before SETUP, then
//! learns the server's half of the transport from the SETUP response.
//! Inbound RTP is depacketized into [`MediaFrame`]s delivered to the
//! client's listener; inbound RTCP feeds a [`ReceiverContext`] that
//! answers with periodic receiver reports.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use rand::RngExt;

use crate::error::{Result, RtspError};
use crate::media::rtp::RtpPacket;
use crate::media::{Codec, Depacketizer, MediaStreamInfo, depacketizer_for};
use crate::protocol::codec::encode_interleaved;
use crate::protocol::sdp::SdpSession;
use crate::rtcp::{DEFAULT_REPORT_INTERVAL_MS, ReceiverContext, unix_now_ms};
use crate::session::transport::{TransportConfig, TransportKind, TransportRole};
use crate::transport::tcp::ConnectionWriter;
use crate::transport::{RtpHandler, TransportAdapter, UdpTransportAdapter};

use super::ClientListener;

/// Client handshake progress (mirrors the request currently in flight).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    OptionsSent,
    DescribeSent,
    SetupSent,
    PlaySent,
    Playing,
    Paused,
    Teardown,
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Init => "Init",
            ClientState::OptionsSent => "OptionsSent",
            ClientState::DescribeSent => "DescribeSent",
            ClientState::SetupSent => "SetupSent",
            ClientState::PlaySent => "PlaySent",
            ClientState::Playing => "Playing",
            ClientState::Paused => "Paused",
            ClientState::Teardown => "Teardown",
        }
    }
}

/// Where the sink's receiver reports go.
enum RtcpTx {
    Udp {
        socket: Arc<UdpSocket>,
        dest: SocketAddr,
    },
    Interleaved {
        writer: Weak<ConnectionWriter>,
        channel: u8,
    },
}

/// Receive-side pipeline shared with the transport's datagram threads:
/// RTP → depacketizer → listener, RTCP → receiver context.
pub struct RtpSink {
    codec: Codec,
    depacketizer: Mutex<Box<dyn Depacketizer>>,
    rtcp: Mutex<ReceiverContext>,
    rtcp_tx: Mutex<Option<RtcpTx>>,
    listener: Arc<dyn ClientListener>,
    cname: String,
    last_report_ms: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl RtpSink {
    fn new(codec: Codec, clock_rate: u32, listener: Arc<dyn ClientListener>) -> Result<Arc<Self>> {
        let ssrc = rand::rng().random::<u32>().max(1);
        Ok(Arc::new(Self {
            codec,
            depacketizer: Mutex::new(depacketizer_for(codec)?),
            // Peer SSRC is learned from the first RTP packet.
            rtcp: Mutex::new(ReceiverContext::new(ssrc, 0, clock_rate)),
            rtcp_tx: Mutex::new(None),
            listener,
            cname: format!("sink@{ssrc:08x}"),
            last_report_ms: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }))
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Cumulative packets lost, per the RTCP receiver context.
    pub fn packets_lost(&self) -> u64 {
        self.rtcp.lock().lost()
    }

    fn set_rtcp_tx(&self, tx: RtcpTx) {
        *self.rtcp_tx.lock() = Some(tx);
    }

    /// Emit RR + SDES when the report interval elapsed.
    fn maybe_send_report(&self, now_ms: u64) {
        let last = self.last_report_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < DEFAULT_REPORT_INTERVAL_MS {
            return;
        }
        if self
            .last_report_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let compound = self.rtcp.lock().build_compound(&self.cname, None, now_ms);
        let guard = self.rtcp_tx.lock();
        match guard.as_ref() {
            Some(RtcpTx::Udp { socket, dest }) => {
                if let Err(e) = socket.send_to(&compound, *dest) {
                    tracing::debug!(error = %e, "receiver report send failed");
                }
            }
            Some(RtcpTx::Interleaved { writer, channel }) => {
                if let Some(writer) = writer.upgrade() {
                    writer.send(&encode_interleaved(*channel, &compound));
                }
            }
            None => {}
        }
    }
}

impl RtpHandler for RtpSink {
    fn on_rtp(&self, data: &[u8]) {
        let Some(packet) = RtpPacket::parse(data) else {
            tracing::debug!(len = data.len(), "undecodable RTP datagram dropped");
            return;
        };

        let now = unix_now_ms();
        self.rtcp.lock().on_rtp(
            packet.sequence_number,
            packet.timestamp,
            packet.ssrc,
            now,
        );
        self.bytes_received
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

        if let Some(frame) = self.depacketizer.lock().push(&packet) {
            self.frames_received.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                bytes = frame.data.len(),
                ts = frame.timestamp,
                codec = ?self.codec,
                "frame reassembled"
            );
            self.listener.on_frame(frame);
        }

        self.maybe_send_report(now);
    }

    fn on_rtcp(&self, data: &[u8]) {
        self.rtcp.lock().on_rtcp(data, unix_now_ms());
    }
}

/// One client-side RTSP session (sink role).
pub struct ClientSession {
    /// Server-assigned session ID (token before any `;timeout=`).
    pub session_id: String,
    state: ClientState,
    /// Stream description assembled from the DESCRIBE SDP.
    pub info: MediaStreamInfo,
    /// Control URL of the track being set up.
    pub control: String,
    kind: TransportKind,
    config: TransportConfig,
    adapter: Option<UdpTransportAdapter>,
    sink: Arc<RtpSink>,
    listener: Arc<dyn ClientListener>,
    url: String,
}

impl ClientSession {
    /// Build the session from a parsed SDP: pick the first track, create
    /// the depacketizer, and (for UDP) bind local ports so the SETUP
    /// request can propose them.
    pub fn from_sdp(
        url: &str,
        sdp: &SdpSession,
        kind: TransportKind,
        server_ip: std::net::IpAddr,
        listener: Arc<dyn ClientListener>,
    ) -> Result<Self> {
        let track = sdp
            .tracks
            .first()
            .ok_or_else(|| RtspError::SdpParse("no media sections".to_string()))?;
        let codec = track
            .codec
            .ok_or_else(|| RtspError::UnsupportedCodec(format!("pt {}", track.payload_type)))?;

        let info = MediaStreamInfo {
            path: url.to_string(),
            kind: track.kind.clone(),
            codec: Some(codec),
            payload_type: track.payload_type,
            clock_rate: track.clock_rate,
            channels: track.channels,
            sample_rate: if track.kind == "audio" { track.clock_rate } else { 0 },
            ..Default::default()
        };

        let sink = RtpSink::new(codec, track.clock_rate.max(1), listener.clone())?;

        let mut config = TransportConfig {
            kind,
            role: TransportRole::Sink,
            peer_ip: server_ip,
            ..Default::default()
        };

        let mut adapter = None;
        if kind == TransportKind::Udp {
            let mut udp = UdpTransportAdapter::new();
            udp.set_handler(sink.clone());
            if !udp.setup(&mut config) {
                return Err(RtspError::PortRangeExhausted);
            }
            adapter = Some(udp);
        }

        Ok(Self {
            session_id: String::new(),
            state: ClientState::Init,
            info,
            control: track.control.clone().unwrap_or_default(),
            kind,
            config,
            adapter,
            sink,
            listener,
            url: url.to_string(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn set_state(&mut self, state: ClientState) {
        if self.state != state {
            tracing::debug!(from = self.state.name(), to = state.name(), "client state");
            self.listener.on_state_changed(self.state.name(), state.name());
            self.state = state;
        }
    }

    pub fn sink(&self) -> Arc<RtpSink> {
        self.sink.clone()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn rtp_channel(&self) -> u8 {
        self.config.rtp_channel
    }

    pub fn rtcp_channel(&self) -> u8 {
        self.config.rtcp_channel
    }

    /// The `Transport` header for the SETUP request.
    pub fn transport_request_header(&self) -> String {
        match self.kind {
            TransportKind::Udp => format!(
                "RTP/AVP;unicast;client_port={}-{}",
                self.config.client_rtp_port, self.config.client_rtcp_port
            ),
            TransportKind::TcpInterleaved => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                self.config.rtp_channel, self.config.rtcp_channel
            ),
        }
    }

    /// Apply the SETUP response: session ID and the server's port pair.
    pub fn apply_setup(
        &mut self,
        session_id: &str,
        transport: Option<&str>,
        control_writer: &Arc<ConnectionWriter>,
    ) {
        self.session_id = session_id
            .split(';')
            .next()
            .unwrap_or(session_id)
            .trim()
            .to_string();

        if let Some(transport) = transport
            && let Some((rtp, rtcp)) = parse_server_ports(transport)
        {
            self.config.server_rtp_port = rtp;
            self.config.server_rtcp_port = rtcp;
            if let Some(adapter) = self.adapter.as_mut() {
                adapter.set_server_ports(rtp, rtcp);
            }
            tracing::info!(rtp, rtcp, "parsed server ports");
        }

        // Wire the receiver-report path now that the destination is known.
        match self.kind {
            TransportKind::Udp => {
                if let Some(adapter) = self.adapter.as_ref()
                    && let Some(socket) = adapter.rtcp_socket()
                    && self.config.server_rtcp_port != 0
                {
                    self.sink.set_rtcp_tx(RtcpTx::Udp {
                        socket,
                        dest: adapter.rtcp_peer_addr(),
                    });
                }
            }
            TransportKind::TcpInterleaved => {
                self.sink.set_rtcp_tx(RtcpTx::Interleaved {
                    writer: Arc::downgrade(control_writer),
                    channel: self.config.rtcp_channel,
                });
            }
        }
    }

    /// Route an interleaved frame from the control connection.
    pub fn handle_interleaved(&self, channel: u8, payload: &[u8]) {
        if channel == self.config.rtp_channel {
            self.sink.on_rtp(payload);
        } else if channel == self.config.rtcp_channel {
            self.sink.on_rtcp(payload);
        } else {
            tracing::debug!(channel, "interleaved frame for unknown channel");
        }
    }

    /// Stop receiving and release transports.
    pub fn close(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.close();
        }
        self.set_state(ClientState::Teardown);
        tracing::debug!(url = %self.url, "client session closed");
    }
}

/// Extract `server_port=<rtp>-<rtcp>` from a Transport header value.
fn parse_server_ports(transport: &str) -> Option<(u16, u16)> {
    for part in transport.split(';') {
        if let Some(ports) = part.trim().strip_prefix("server_port=") {
            let (rtp, rtcp) = ports.split_once('-')?;
            return Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?));
        }
    }
    None
}
