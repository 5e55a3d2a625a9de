//! High-level RTSP server orchestrator.

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, RtspError};
use crate::media::{MediaFrame, MediaStreamInfo};
use crate::rtcp::unix_now_ms;
use crate::session::{DEFAULT_SESSION_TIMEOUT_SECS, SessionManager};
use crate::stream::{StreamRegistry, extract_stream_path};
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, the host is inferred from the request URI or the
    /// client-facing local address.
    pub public_host: Option<String>,
    /// Inactivity timeout for sessions, advertised in the `Session` header.
    pub session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

/// Interval of the background sweep that expires idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// RTSP server: owns the session registry and published streams, accepts
/// connections, and fans pushed frames out to playing sessions.
///
/// ```no_run
/// use rtsp::media::Codec;
/// use rtsp::{MediaFrame, MediaStreamInfo, Server};
///
/// let (sps, pps) = (vec![0x67, 0x42, 0x00, 0x1f], vec![0x68, 0xce]);
/// let mut server = Server::new("0.0.0.0:8554");
/// server.add_stream(MediaStreamInfo::h264("/live", sps, pps));
/// server.start().unwrap();
///
/// // Push Annex B frames; the server packetizes and delivers via RTP.
/// let frame = MediaFrame::new(Codec::H264, vec![0, 0, 0, 1, 0x65], 3000);
/// server.push_frame("/live", &frame).unwrap();
/// ```
pub struct Server {
    bind_addr: String,
    session_manager: SessionManager,
    streams: StreamRegistry,
    running: Arc<AtomicBool>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            session_manager: SessionManager::new(),
            streams: StreamRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
        }
    }

    /// Publish a stream for DESCRIBE/SETUP.
    pub fn add_stream(&self, info: MediaStreamInfo) {
        self.streams.add(info);
    }

    /// Unpublish a stream path.
    pub fn remove_stream(&self, path: &str) {
        self.streams.remove(path);
    }

    /// Bind the listener and spawn the accept loop plus the session sweep.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");

        {
            let session_manager = self.session_manager.clone();
            let streams = self.streams.clone();
            let config = self.config.clone();
            let running = self.running.clone();
            thread::spawn(move || {
                tcp::accept_loop(listener, session_manager, streams, config, running);
            });
        }

        {
            let session_manager = self.session_manager.clone();
            let running = self.running.clone();
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(SWEEP_INTERVAL);
                    let expired = session_manager.expire_stale(unix_now_ms());
                    if expired > 0 {
                        tracing::info!(expired, "idle sessions swept");
                    }
                }
            });
        }

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver one access unit to every playing session on `path`.
    ///
    /// Returns how many sessions received it. The server neither paces
    /// nor queues: frame cadence belongs to the application.
    pub fn push_frame(&self, path: &str, frame: &MediaFrame) -> Result<usize> {
        if !self.is_running() {
            return Err(RtspError::NotStarted);
        }
        let mut delivered = 0;
        for session in self.session_manager.playing_sessions() {
            if extract_stream_path(&session.uri.read()) == path && session.push_frame(frame) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Sessions currently in the PLAYING state.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.session_manager
            .playing_sessions()
            .iter()
            .map(|session| Viewer {
                session_id: session.id.clone(),
                uri: session.uri.read().clone(),
                tracks: session.track_count(),
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Information about a connected viewer (session in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub tracks: usize,
}
