//! TCP signaling transport and the interleaved data adapter.
//!
//! One thread per accepted connection reads raw bytes into a buffer and
//! drains it through [`protocol::codec::decode`], which separates ASCII
//! RTSP messages from `$`-framed binary frames multiplexed on the same
//! stream (RFC 2326 §10.12). Writes — responses as well as interleaved
//! media — are serialized through one [`ConnectionWriter`] per connection.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::codec::{Decoded, decode, encode_interleaved};
use crate::protocol::handler::MethodHandler;
use crate::server::ServerConfig;
use crate::session::SessionManager;
use crate::session::transport::{TransportConfig, TransportKind};
use crate::stream::StreamRegistry;

use super::TransportAdapter;

/// Poll interval for the accept loop and connection reads, so server
/// shutdown is noticed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Serialized writer for one control connection.
///
/// RTSP responses and interleaved frames interleave on the same stream;
/// the mutex keeps each write atomic.
pub struct ConnectionWriter {
    stream: Mutex<TcpStream>,
}

impl ConnectionWriter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    pub fn send(&self, data: &[u8]) -> bool {
        let mut stream = self.stream.lock();
        match stream.write_all(data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "connection write failed");
                false
            }
        }
    }
}

/// Transport adapter multiplexing RTP/RTCP onto the control connection.
///
/// Holds the connection writer weakly: when the connection dies first,
/// sends fail cleanly instead of keeping the socket alive.
pub struct TcpInterleavedAdapter {
    writer: Weak<ConnectionWriter>,
    rtp_channel: u8,
    rtcp_channel: u8,
    active: bool,
}

impl TcpInterleavedAdapter {
    pub fn new(writer: Weak<ConnectionWriter>) -> Self {
        Self {
            writer,
            rtp_channel: 0,
            rtcp_channel: 1,
            active: false,
        }
    }

    fn send_on(&self, channel: u8, data: &[u8]) -> bool {
        if !self.active || data.is_empty() {
            return false;
        }
        let Some(writer) = self.writer.upgrade() else {
            return false;
        };
        writer.send(&encode_interleaved(channel, data))
    }
}

impl TransportAdapter for TcpInterleavedAdapter {
    fn setup(&mut self, config: &mut TransportConfig) -> bool {
        if config.kind != TransportKind::TcpInterleaved {
            return false;
        }
        // Channel pairing is validated at Transport parse time; re-check
        // since this adapter can be constructed directly.
        if config.rtp_channel % 2 != 0 || config.rtcp_channel != config.rtp_channel + 1 {
            tracing::warn!(
                rtp = config.rtp_channel,
                rtcp = config.rtcp_channel,
                "invalid interleaved channel pair"
            );
            return false;
        }
        self.rtp_channel = config.rtp_channel;
        self.rtcp_channel = config.rtcp_channel;
        self.active = self.writer.upgrade().is_some();
        self.active
    }

    fn send_rtp(&self, data: &[u8]) -> bool {
        self.send_on(self.rtp_channel, data)
    }

    fn send_rtcp(&self, data: &[u8]) -> bool {
        self.send_on(self.rtcp_channel, data)
    }

    fn close(&mut self) {
        self.active = false;
    }

    fn transport_info(&self) -> String {
        format!(
            "RTP/AVP/TCP;interleaved={}-{}",
            self.rtp_channel, self.rtcp_channel
        )
    }

    fn is_active(&self) -> bool {
        self.active && self.writer.upgrade().is_some()
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts so that
/// [`Server::stop`](crate::Server::stop) can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    session_manager: SessionManager,
    streams: StreamRegistry,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let sm = session_manager.clone();
                let st = streams.clone();
                let cfg = config.clone();
                let run = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, sm, st, cfg, run);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: TcpStream,
    writer: Arc<ConnectionWriter>,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    buffer: Vec<u8>,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(
        stream: TcpStream,
        session_manager: SessionManager,
        streams: StreamRegistry,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };
        tracing::info!(%peer_addr, "client connected");

        let reader = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        if reader.set_read_timeout(Some(READ_TIMEOUT)).is_err() {
            return;
        }

        let writer = Arc::new(ConnectionWriter::new(stream));
        let handler = MethodHandler::new(
            session_manager.clone(),
            streams,
            peer_addr,
            config,
            Arc::downgrade(&writer),
        );

        let mut conn = Connection {
            reader,
            writer,
            handler,
            peer_addr,
            buffer: Vec::new(),
        };

        let reason = conn.run(&running);
        conn.cleanup(&session_manager);
        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Read/dispatch loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        let mut chunk = [0u8; 8192];
        while running.load(Ordering::SeqCst) {
            match self.reader.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(len) => {
                    self.buffer.extend_from_slice(&chunk[..len]);
                    if !self.drain_buffer() {
                        return "protocol error";
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => return "read error",
            }
        }
        "server shutting down"
    }

    /// Dispatch every complete message buffered so far.
    fn drain_buffer(&mut self) -> bool {
        loop {
            match decode(&self.buffer) {
                Ok(Decoded::Incomplete) => return true,
                Ok(Decoded::Request { request, consumed }) => {
                    self.buffer.drain(..consumed);

                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        "request"
                    );
                    let response = self.handler.handle(&request);
                    tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");

                    if !self.writer.send(response.serialize().as_bytes()) {
                        return false;
                    }
                    // TEARDOWN transports close only after the reply is out.
                    if let Some(session) = self.handler.take_deferred_teardown() {
                        session.teardown_streams();
                    }
                }
                Ok(Decoded::Interleaved {
                    channel,
                    payload,
                    consumed,
                }) => {
                    self.buffer.drain(..consumed);
                    self.handler.handle_interleaved(channel, &payload);
                }
                Ok(Decoded::Response { consumed, .. }) => {
                    // A server never expects responses on this connection.
                    self.buffer.drain(..consumed);
                    tracing::debug!(peer = %self.peer_addr, "unexpected RTSP response dropped");
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "malformed message");
                    self.writer
                        .send(crate::protocol::RtspResponse::bad_request().serialize().as_bytes());
                    return false;
                }
            }
        }
    }

    /// Remove sessions owned by this connection.
    fn cleanup(&self, session_manager: &SessionManager) {
        let orphaned = self.handler.session_ids().to_vec();
        if !orphaned.is_empty() {
            let removed = session_manager.remove_many(&orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}
