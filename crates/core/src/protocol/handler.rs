use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::rtcp::unix_now_ms;
use crate::server::ServerConfig;
use crate::session::transport::{TransportConfig, TransportKind, TransportRole, TransportSpec};
use crate::session::{MethodOutcome, Session, SessionManager, SessionState, transition};
use crate::stream::{MediaStream, StreamRegistry};
use crate::transport::tcp::{ConnectionWriter, TcpInterleavedAdapter};
use crate::transport::{TransportAdapter, UdpTransportAdapter};

/// Handles RTSP method requests for a single TCP connection.
///
/// Stateless methods (OPTIONS, DESCRIBE) are answered without touching any
/// session; stateful methods go through the session transition table and
/// answer 455 when the method is not valid in the current state. The
/// handler tracks which sessions this connection created so they can be
/// cleaned up when the connection drops.
pub struct MethodHandler {
    session_manager: SessionManager,
    streams: StreamRegistry,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    /// Control-connection writer, handed to TCP-interleaved adapters.
    writer: Weak<ConnectionWriter>,
    /// Session IDs created on this connection, for disconnect cleanup.
    session_ids: Vec<String>,
    /// Session whose transports close after the response is written
    /// (the TEARDOWN reply must precede the adapter close).
    deferred_teardown: Option<Arc<Session>>,
}

impl MethodHandler {
    pub fn new(
        session_manager: SessionManager,
        streams: StreamRegistry,
        client_addr: SocketAddr,
        config: Arc<ServerConfig>,
        writer: Weak<ConnectionWriter>,
    ) -> Self {
        MethodHandler {
            session_manager,
            streams,
            client_addr,
            config,
            writer,
            session_ids: Vec::new(),
            deferred_teardown: None,
        }
    }

    /// Session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    /// Take the session whose transports should close now that the
    /// response hit the wire.
    pub fn take_deferred_teardown(&mut self) -> Option<Arc<Session>> {
        self.deferred_teardown.take()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(cseq) = request.cseq().map(str::to_string) else {
            tracing::warn!(method = %request.method, "request without CSeq");
            return RtspResponse::bad_request();
        };
        let cseq = cseq.as_str();

        // Any request on a known session refreshes its timeout.
        if let Some(id) = request.session_id()
            && let Some(session) = self.session_manager.get(&id)
        {
            session.touch(unix_now_ms());
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            "GET_PARAMETER" | "SET_PARAMETER" => self.handle_parameter(cseq, request),
            "ANNOUNCE" | "RECORD" | "REDIRECT" => {
                tracing::debug!(method = %request.method, %cseq, "method not implemented");
                RtspResponse::new(501).add_header("CSeq", cseq)
            }
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unknown RTSP method");
                RtspResponse::new(501).add_header("CSeq", cseq)
            }
        }
    }

    /// Route an inbound interleaved frame (client RTCP feedback) to the
    /// owning session. Binary frames never cause state transitions.
    pub fn handle_interleaved(&self, channel: u8, payload: &[u8]) {
        if channel % 2 == 0 {
            tracing::debug!(channel, "inbound interleaved RTP ignored (no RECORD support)");
            return;
        }
        let now = unix_now_ms();
        for id in &self.session_ids {
            if let Some(session) = self.session_manager.get(id) {
                session.handle_interleaved_rtcp(channel, payload, now);
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok().add_header("CSeq", cseq).add_header(
            "Public",
            "OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY, PAUSE",
        )
    }

    /// Host to advertise in SDP: configured public host, else the host the
    /// client used in its request URI, else the client-facing local IP.
    fn advertised_host(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        if let Some(after_scheme) = uri.strip_prefix("rtsp://") {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        crate::transport::udp::local_ip_for(self.client_addr.ip()).to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let Some(info) = self.streams.resolve_from_uri(uri) else {
            tracing::warn!(uri, "DESCRIBE for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let sdp = sdp::generate_sdp(&info, &self.advertised_host(uri));
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", uri)
            .with_body(sdp)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(info) = self.streams.resolve_from_uri(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };
        let spec = match TransportSpec::parse(transport_header) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(%cseq, transport_header, error = %e, "unsupported transport");
                return RtspResponse::new(461).add_header("CSeq", cseq);
            }
        };

        // DESCRIBE is stateless; the session starts at the first SETUP and
        // accumulates one track per additional SETUP.
        let session = match request.session_id() {
            Some(id) => match self.session_manager.get(&id) {
                Some(session) => session,
                None => {
                    return RtspResponse::session_not_found().add_header("CSeq", cseq);
                }
            },
            None => {
                let session = self.session_manager.create_session_with_timeout(
                    &request.uri,
                    unix_now_ms(),
                    self.config.session_timeout_secs,
                );
                self.session_ids.push(session.id.clone());
                session
            }
        };

        match transition(session.state(), "SETUP") {
            MethodOutcome::NotValid => {
                return RtspResponse::method_not_valid()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.header_value());
            }
            MethodOutcome::Transition(_) | MethodOutcome::NoOp => {}
        }

        let tracks = info.tracks();
        let index = track_index(&request.uri);
        let Some(track) = tracks.get(index) else {
            tracing::warn!(uri = %request.uri, index, "SETUP for unknown track");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };
        let Some(codec) = track.codec else {
            return RtspResponse::new(415).add_header("CSeq", cseq);
        };

        let adapter: Box<dyn TransportAdapter> = match spec.kind {
            TransportKind::Udp => Box::new(UdpTransportAdapter::new()),
            TransportKind::TcpInterleaved => {
                Box::new(TcpInterleavedAdapter::new(self.writer.clone()))
            }
        };
        let mut config =
            TransportConfig::from_spec(&spec, TransportRole::Source, self.client_addr.ip());

        let mut stream = match MediaStream::new(
            &request.uri,
            codec,
            track.payload_type,
            track.clock_rate.max(1),
            adapter,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "failed to create media stream");
                return RtspResponse::new(415).add_header("CSeq", cseq);
            }
        };
        if !stream.setup(&mut config) {
            tracing::error!(uri = %request.uri, "transport setup failed");
            return RtspResponse::new(500).add_header("CSeq", cseq);
        }

        session.add_stream(stream);
        session.set_state(SessionState::Ready);

        tracing::info!(
            session_id = %session.id,
            uri = %request.uri,
            transport = %config.response_header(),
            tracks = session.track_count(),
            "track set up"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &config.response_header())
            .add_header("Session", &session.header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.request_session(request) else {
            tracing::warn!(%cseq, "PLAY without valid session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match transition(session.state(), "PLAY") {
            MethodOutcome::NotValid => RtspResponse::method_not_valid()
                .add_header("CSeq", cseq)
                .add_header("Session", &session.header_value()),
            MethodOutcome::NoOp => RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Session", &session.header_value()),
            MethodOutcome::Transition(next) => {
                session.play_streams();
                session.set_state(next);
                tracing::info!(session_id = %session.id, "session playing");

                // Seek is not implemented: the range is echoed, npt=0- by default.
                let range = request.header("Range").unwrap_or("npt=0-");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.header_value())
                    .add_header("Range", range)
                    .add_header("RTP-Info", &session.rtp_info())
            }
        }
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.request_session(request) else {
            tracing::warn!(%cseq, "PAUSE without valid session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match transition(session.state(), "PAUSE") {
            MethodOutcome::NotValid => RtspResponse::method_not_valid()
                .add_header("CSeq", cseq)
                .add_header("Session", &session.header_value()),
            MethodOutcome::NoOp => RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Session", &session.header_value()),
            MethodOutcome::Transition(next) => {
                session.pause_streams();
                session.set_state(next);
                tracing::info!(session_id = %session.id, "session paused");
                RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.header_value())
            }
        }
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.request_session(request) else {
            tracing::warn!(%cseq, "TEARDOWN without valid session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        match transition(session.state(), "TEARDOWN") {
            MethodOutcome::Transition(next) => {
                session.set_state(next);
                self.session_manager.remove(&session.id);
                self.session_ids.retain(|id| id != &session.id);
                tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
                // Transports close after the response is on the wire.
                self.deferred_teardown = Some(session);
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            _ => RtspResponse::ok().add_header("CSeq", cseq),
        }
    }

    /// GET_PARAMETER/SET_PARAMETER double as keepalives (RFC 2326 §10.8).
    fn handle_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, method = %request.method, "parameter keepalive");
        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(id) = request.session_id()
            && self.session_manager.get(&id).is_some()
        {
            resp = resp.add_header("Session", &id);
        }
        resp
    }

    fn request_session(&self, request: &RtspRequest) -> Option<Arc<Session>> {
        self.session_manager.get(&request.session_id()?)
    }
}

/// Track index from a `.../trackN` URI suffix; defaults to track 0.
fn track_index(uri: &str) -> usize {
    uri.rfind("/track")
        .and_then(|pos| uri[pos + 6..].parse().ok())
        .unwrap_or(0)
}
