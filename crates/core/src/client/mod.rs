//! RTSP client: connection management and the handshake driver.
//!
//! [`RtspClient`] connects to a server, performs the
//! OPTIONS → DESCRIBE → SETUP → PLAY sequence, and hands reassembled
//! frames to a [`ClientListener`]. Each response is dispatched to the
//! current state's handler, which yields one of four [`Action`]s:
//! *continue* (next request sent), *wait*, *success* (handshake done), or
//! *fail*. An OPTIONS failure is tolerated — the method is advisory, so
//! the driver proceeds to DESCRIBE regardless.
//!
//! Media arrives over UDP sink sockets (background receive threads) or as
//! interleaved frames on the control connection, which [`RtspClient::poll`]
//! drains.

pub mod session;

use std::io::Read;
use std::net::{IpAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, RtspError};
use crate::media::MediaFrame;
use crate::protocol::codec::{Decoded, decode};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{parse_sdp, resolve_control_url};
use crate::session::transport::TransportKind;
use crate::transport::tcp::ConnectionWriter;

pub use session::{ClientSession, ClientState, RtpSink};

/// Default RTSP port (RFC 2326 §3.2).
pub const DEFAULT_RTSP_PORT: u16 = 554;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Observable client events, delivered from the calling thread (control
/// messages) or the UDP receive threads (frames).
#[allow(unused_variables)]
pub trait ClientListener: Send + Sync {
    fn on_connected(&self, url: &str) {}
    fn on_disconnected(&self, url: &str) {}
    fn on_describe(&self, url: &str, sdp: &str) {}
    fn on_setup(&self, url: &str, session_id: &str, transport: &str) {}
    fn on_play(&self, url: &str, session_id: &str) {}
    fn on_pause(&self, url: &str, session_id: &str) {}
    fn on_teardown(&self, url: &str, session_id: &str) {}
    fn on_frame(&self, frame: MediaFrame) {}
    fn on_error(&self, code: i32, message: &str) {}
    fn on_state_changed(&self, from: &str, to: &str) {}
}

/// Next step chosen by a state's response handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The next request was sent; keep reading.
    Continue,
    /// Stay in this state.
    Wait,
    /// Handshake complete.
    Success,
    /// Abort the handshake.
    Fail,
}

/// Blocking RTSP client for one stream URL.
pub struct RtspClient {
    url: String,
    host: String,
    port: u16,
    state: ClientState,
    reader: Option<TcpStream>,
    writer: Option<Arc<ConnectionWriter>>,
    buffer: Vec<u8>,
    cseq: u32,
    user_agent: String,
    transport_kind: TransportKind,
    listener: Arc<dyn ClientListener>,
    session: Option<ClientSession>,
}

impl RtspClient {
    /// Create a client for `rtsp://host[:port]/path`.
    pub fn new(url: &str, listener: Arc<dyn ClientListener>) -> Result<Self> {
        let (host, port) = parse_url(url)?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            host,
            port,
            state: ClientState::Init,
            reader: None,
            writer: None,
            buffer: Vec::new(),
            cseq: 0,
            user_agent: "rtsp-stack/0.1".to_string(),
            transport_kind: TransportKind::Udp,
            listener,
            session: None,
        })
    }

    /// Select TCP-interleaved media transport instead of UDP.
    pub fn with_interleaved_transport(mut self) -> Self {
        self.transport_kind = TransportKind::TcpInterleaved;
        self
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Establish the control connection.
    pub fn connect(&mut self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let writer_stream = stream.try_clone()?;

        self.reader = Some(stream);
        self.writer = Some(Arc::new(ConnectionWriter::new(writer_stream)));
        tracing::info!(host = %self.host, port = self.port, "connected to RTSP server");
        self.listener.on_connected(&self.url);
        Ok(())
    }

    /// Run the handshake until media flows: OPTIONS → DESCRIBE → SETUP →
    /// PLAY. Connects first when needed.
    pub fn start(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.connect()?;
        }

        let req = self.build_request("OPTIONS", &self.url.clone());
        self.send_request(req)?;
        self.set_state(ClientState::OptionsSent);

        loop {
            let response = self.read_response()?;
            match self.on_response(&response)? {
                Action::Continue | Action::Wait => continue,
                Action::Success => return Ok(()),
                Action::Fail => {
                    return Err(RtspError::Status {
                        status: response.status_code,
                        reason: response.reason,
                    });
                }
            }
        }
    }

    /// Dispatch one response according to the current state.
    fn on_response(&mut self, response: &RtspResponse) -> Result<Action> {
        match self.state {
            ClientState::OptionsSent => {
                if !response.is_success() {
                    // OPTIONS is advisory; proceed to DESCRIBE anyway.
                    tracing::warn!(status = response.status_code, "OPTIONS failed, continuing");
                }
                let req = self
                    .build_request("DESCRIBE", &self.url.clone())
                    .add_header("Accept", "application/sdp");
                self.send_request(req)?;
                self.set_state(ClientState::DescribeSent);
                Ok(Action::Continue)
            }
            ClientState::DescribeSent => self.on_describe_response(response),
            ClientState::SetupSent => self.on_setup_response(response),
            ClientState::PlaySent => {
                if !response.is_success() {
                    self.notify_error(response);
                    return Ok(Action::Fail);
                }
                self.set_state(ClientState::Playing);
                let session_id = self
                    .session
                    .as_ref()
                    .map(|s| s.session_id.clone())
                    .unwrap_or_default();
                self.listener.on_play(&self.url, &session_id);
                tracing::info!(session_id, "client playing");
                Ok(Action::Success)
            }
            _ => Ok(Action::Wait),
        }
    }

    fn on_describe_response(&mut self, response: &RtspResponse) -> Result<Action> {
        if !response.is_success() {
            self.notify_error(response);
            return Ok(Action::Fail);
        }
        let Some(body) = response.body.as_deref() else {
            self.listener.on_error(-1, "DESCRIBE response without SDP");
            return Ok(Action::Fail);
        };

        let sdp = match parse_sdp(body) {
            Ok(sdp) => sdp,
            Err(e) => {
                self.listener.on_error(-1, &e.to_string());
                return Ok(Action::Fail);
            }
        };
        self.listener.on_describe(&self.url, body);

        let server_ip = self.server_ip()?;
        let session = ClientSession::from_sdp(
            &self.url,
            &sdp,
            self.transport_kind,
            server_ip,
            self.listener.clone(),
        )?;

        // SETUP targets the track control URL; PLAY later targets the
        // aggregate base URL.
        let setup_url = resolve_control_url(&self.url, &session.control);
        let transport = session.transport_request_header();
        self.session = Some(session);

        let req = self
            .build_request("SETUP", &setup_url)
            .add_header("Transport", &transport);
        self.send_request(req)?;
        self.set_state(ClientState::SetupSent);
        Ok(Action::Continue)
    }

    fn on_setup_response(&mut self, response: &RtspResponse) -> Result<Action> {
        if !response.is_success() {
            self.notify_error(response);
            return Ok(Action::Fail);
        }
        let Some(writer) = self.writer.clone() else {
            return Ok(Action::Fail);
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(Action::Fail);
        };

        let session_header = response.header("Session").unwrap_or_default().to_string();
        let transport = response.header("Transport").map(str::to_string);
        session.apply_setup(&session_header, transport.as_deref(), &writer);
        let session_id = session.session_id.clone();
        self.listener
            .on_setup(&self.url, &session_id, transport.as_deref().unwrap_or(""));

        let req = self
            .build_request("PLAY", &self.url.clone())
            .add_header("Session", &session_id)
            .add_header("Range", "npt=0-");
        self.send_request(req)?;
        self.set_state(ClientState::PlaySent);
        Ok(Action::Continue)
    }

    /// Suspend delivery. Valid while playing.
    pub fn pause(&mut self) -> Result<()> {
        if self.state != ClientState::Playing {
            return Err(RtspError::InvalidState(self.state.name()));
        }
        let session_id = self.session_id()?;
        let req = self
            .build_request("PAUSE", &self.url.clone())
            .add_header("Session", &session_id);
        self.send_request(req)?;
        let response = self.read_response()?;
        if !response.is_success() {
            self.notify_error(&response);
            return Err(RtspError::Status {
                status: response.status_code,
                reason: response.reason,
            });
        }
        self.set_state(ClientState::Paused);
        self.listener.on_pause(&self.url, &session_id);
        Ok(())
    }

    /// Resume delivery after [`pause`](Self::pause).
    pub fn resume(&mut self) -> Result<()> {
        if self.state != ClientState::Paused {
            return Err(RtspError::InvalidState(self.state.name()));
        }
        let session_id = self.session_id()?;
        let req = self
            .build_request("PLAY", &self.url.clone())
            .add_header("Session", &session_id);
        self.send_request(req)?;
        let response = self.read_response()?;
        if !response.is_success() {
            self.notify_error(&response);
            return Err(RtspError::Status {
                status: response.status_code,
                reason: response.reason,
            });
        }
        self.set_state(ClientState::Playing);
        self.listener.on_play(&self.url, &session_id);
        Ok(())
    }

    /// End the session and close transports.
    pub fn teardown(&mut self) -> Result<()> {
        let session_id = self.session_id()?;
        let req = self
            .build_request("TEARDOWN", &self.url.clone())
            .add_header("Session", &session_id);
        self.send_request(req)?;
        let _ = self.read_response();

        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.set_state(ClientState::Teardown);
        self.listener.on_teardown(&self.url, &session_id);
        Ok(())
    }

    /// Session keepalive (GET_PARAMETER, RFC 2326 §10.8).
    pub fn keepalive(&mut self) -> Result<()> {
        let session_id = self.session_id()?;
        let req = self
            .build_request("GET_PARAMETER", &self.url.clone())
            .add_header("Session", &session_id);
        self.send_request(req)?;
        let _ = self.read_response()?;
        Ok(())
    }

    /// Drain inbound control-connection data for up to `timeout`.
    ///
    /// Required while playing over TCP-interleaved transport, where media
    /// arrives on this connection; harmless for UDP.
    pub fn poll(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.read_once()? == 0 && self.buffer.is_empty() {
                continue;
            }
            self.drain_non_response()?;
        }
        Ok(())
    }

    /// Drop the control connection without TEARDOWN (peer loss path).
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.reader = None;
        self.writer = None;
        self.buffer.clear();
        self.listener.on_disconnected(&self.url);
    }

    fn session_id(&self) -> Result<String> {
        self.session
            .as_ref()
            .filter(|s| !s.session_id.is_empty())
            .map(|s| s.session_id.clone())
            .ok_or_else(|| RtspError::SessionNotFound("no active session".to_string()))
    }

    fn server_ip(&self) -> Result<IpAddr> {
        let reader = self.reader.as_ref().ok_or(RtspError::NotStarted)?;
        Ok(reader.peer_addr()?.ip())
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        let old = self.state;
        self.state = state;
        if let Some(session) = self.session.as_mut() {
            session.set_state(state);
        } else {
            self.listener.on_state_changed(old.name(), state.name());
        }
    }

    fn build_request(&mut self, method: &str, uri: &str) -> RtspRequest {
        self.cseq += 1;
        RtspRequest::new(method, uri)
            .add_header("CSeq", &self.cseq.to_string())
            .add_header("User-Agent", &self.user_agent)
    }

    fn send_request(&mut self, request: RtspRequest) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(RtspError::NotStarted)?;
        tracing::debug!(method = %request.method, uri = %request.uri, cseq = self.cseq, "sending request");
        if !writer.send(request.serialize().as_bytes()) {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "send failed").into());
        }
        Ok(())
    }

    /// Read until a complete RTSP response arrives, feeding interleaved
    /// frames to the session along the way.
    fn read_response(&mut self) -> Result<RtspResponse> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            if let Some(response) = self.try_decode_response()? {
                tracing::debug!(status = response.status_code, "response");
                return Ok(response);
            }
            if Instant::now() >= deadline {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out waiting for RTSP response",
                )
                .into());
            }
            self.read_once()?;
        }
    }

    /// Decode buffered messages until a response (or exhaustion).
    fn try_decode_response(&mut self) -> Result<Option<RtspResponse>> {
        loop {
            match decode(&self.buffer)? {
                Decoded::Incomplete => return Ok(None),
                Decoded::Response { response, consumed } => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(response));
                }
                Decoded::Interleaved {
                    channel,
                    payload,
                    consumed,
                } => {
                    self.buffer.drain(..consumed);
                    if let Some(session) = self.session.as_ref() {
                        session.handle_interleaved(channel, &payload);
                    }
                }
                Decoded::Request { request, consumed } => {
                    self.buffer.drain(..consumed);
                    tracing::debug!(method = %request.method, "server-initiated request ignored");
                }
            }
        }
    }

    /// Drain buffered interleaved frames and server-initiated requests.
    fn drain_non_response(&mut self) -> Result<()> {
        while let Some(response) = self.try_decode_response()? {
            tracing::debug!(status = response.status_code, "unsolicited response dropped");
        }
        Ok(())
    }

    /// One socket read into the buffer; 0 on timeout.
    fn read_once(&mut self) -> Result<usize> {
        let reader = self.reader.as_mut().ok_or(RtspError::NotStarted)?;
        let mut chunk = [0u8; 8192];
        match reader.read(&mut chunk) {
            Ok(0) => {
                self.disconnect();
                Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed connection",
                )
                .into())
            }
            Ok(len) => {
                self.buffer.extend_from_slice(&chunk[..len]);
                Ok(len)
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn notify_error(&self, response: &RtspResponse) {
        self.listener
            .on_error(response.status_code as i32, &response.reason);
    }
}

/// Parse `rtsp://host[:port]/path` into host and port (default 554).
fn parse_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("rtsp://")
        .ok_or_else(|| RtspError::SdpParse(format!("not an rtsp URL: {url}")))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(RtspError::SdpParse(format!("no host in URL: {url}")));
    }

    match authority.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| RtspError::SdpParse(format!("bad port in URL: {url}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), DEFAULT_RTSP_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_variants() {
        assert_eq!(
            parse_url("rtsp://10.0.0.1:8554/live").unwrap(),
            ("10.0.0.1".to_string(), 8554)
        );
        assert_eq!(
            parse_url("rtsp://camera.local/stream").unwrap(),
            ("camera.local".to_string(), DEFAULT_RTSP_PORT)
        );
        assert!(parse_url("http://h/p").is_err());
        assert!(parse_url("rtsp:///p").is_err());
        assert!(parse_url("rtsp://h:notaport/p").is_err());
    }

    struct NullListener;
    impl ClientListener for NullListener {}

    #[test]
    fn cseq_increments_per_request() {
        let mut client = RtspClient::new("rtsp://127.0.0.1:554/x", Arc::new(NullListener)).unwrap();
        let r1 = client.build_request("OPTIONS", "rtsp://127.0.0.1:554/x");
        let r2 = client.build_request("DESCRIBE", "rtsp://127.0.0.1:554/x");
        assert_eq!(r1.header("CSeq"), Some("1"));
        assert_eq!(r2.header("CSeq"), Some("2"));
    }

    #[test]
    fn operations_require_session() {
        let mut client = RtspClient::new("rtsp://127.0.0.1:554/x", Arc::new(NullListener)).unwrap();
        assert!(client.pause().is_err());
        assert!(client.teardown().is_err());
    }
}
