//! Server-side RTSP session management (RFC 2326 §3, §A.1).
//!
//! A session is created by the first SETUP on a connection and destroyed
//! by TEARDOWN, connection loss, or inactivity timeout. It tracks:
//!
//! - A unique session ID (hex token, returned in the `Session` header).
//! - The protocol state, advanced only through [`transition`].
//! - One [`MediaStream`](crate::stream::MediaStream) per set-up track.
//! - A last-active timestamp refreshed on every inbound request
//!   (default timeout 60 s, per RFC 2326 §12.37).
//!
//! ## State machine
//!
//! ```text
//!            SETUP            PLAY
//!   INIT ────────────▶ READY ──────▶ PLAYING
//!    ▲                  │  ▲            │ ▲
//!    │       TEARDOWN   │  │            │ │ PLAY
//!    └──────────────────┴──┼───PAUSE────▼ │
//!                          └────────── PAUSED
//! ```
//!
//! Requests outside this table answer 455 Method Not Valid in This State.

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::RngExt;

use crate::media::MediaFrame;
use crate::stream::MediaStream;

pub use transport::{TransportConfig, TransportKind, TransportRole, TransportSpec};

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session protocol state (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport negotiated yet.
    Init,
    /// At least one track set up, not playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; resumable via PLAY.
    Paused,
    /// Reserved for RECORD, which this server answers 501.
    Recording,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Init => "INIT",
            SessionState::Ready => "READY",
            SessionState::Playing => "PLAYING",
            SessionState::Paused => "PAUSED",
            SessionState::Recording => "RECORDING",
        }
    }
}

/// What a stateful method does to a session in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodOutcome {
    /// Perform the method's work and move to the new state.
    Transition(SessionState),
    /// Answer 200 without changing state (idempotent request).
    NoOp,
    /// Answer 455 Method Not Valid in This State.
    NotValid,
}

/// The canonical transition table for SETUP/PLAY/PAUSE/TEARDOWN.
///
/// Stateless methods (OPTIONS, DESCRIBE, GET_PARAMETER, SET_PARAMETER)
/// never consult this table.
pub fn transition(state: SessionState, method: &str) -> MethodOutcome {
    use MethodOutcome::*;
    use SessionState::*;

    match (state, method) {
        (Init, "SETUP") => Transition(Ready),
        (Ready, "SETUP") => Transition(Ready), // additional track
        (Playing | Paused, "SETUP") => NotValid,

        (Ready | Paused, "PLAY") => Transition(Playing),
        (Playing, "PLAY") => NoOp,
        (Init, "PLAY") => NotValid,

        (Playing, "PAUSE") => Transition(Paused),
        (Paused, "PAUSE") => NoOp,
        (Init | Ready, "PAUSE") => NotValid,

        (Init, "TEARDOWN") => NoOp,
        (_, "TEARDOWN") => Transition(Init),

        _ => NotValid,
    }
}

/// A single server-side RTSP session.
///
/// Owned by the [`SessionManager`]; per-session state is mutated from the
/// owning connection's read task, so the interior locks are held only for
/// the duration of a single request.
pub struct Session {
    /// Unique session identifier (8-char hex token).
    pub id: String,
    /// Base stream URI from the first SETUP.
    pub uri: RwLock<String>,
    state: RwLock<SessionState>,
    streams: Mutex<Vec<MediaStream>>,
    last_active_ms: AtomicU64,
    /// Timeout advertised in the `Session` response header.
    pub timeout_secs: u64,
}

impl Session {
    pub fn new(uri: &str, now_ms: u64) -> Self {
        Self::with_timeout(uri, now_ms, DEFAULT_SESSION_TIMEOUT_SECS)
    }

    pub fn with_timeout(uri: &str, now_ms: u64, timeout_secs: u64) -> Self {
        let id = format!("{:08X}", rand::rng().random::<u32>());
        Session {
            id,
            uri: RwLock::new(uri.to_string()),
            state: RwLock::new(SessionState::Init),
            streams: Mutex::new(Vec::new()),
            last_active_ms: AtomicU64::new(now_ms),
            timeout_secs,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        tracing::debug!(
            session_id = %self.id,
            from = current.name(),
            to = state.name(),
            "state transition"
        );
        *current = state;
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SessionState::Playing
    }

    /// Refresh the inactivity timer (called on every inbound request).
    pub fn touch(&self, now_ms: u64) {
        self.last_active_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Whether the session has been idle past its timeout.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        let last = self.last_active_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last) > self.timeout_secs * 1000
    }

    /// Format the `Session` response header value per RFC 2326 §12.37,
    /// e.g. `"3F2A90B1;timeout=60"`.
    pub fn header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }

    /// Install the per-track stream manager created at SETUP.
    pub fn add_stream(&self, stream: MediaStream) {
        self.streams.lock().push(stream);
    }

    pub fn track_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Start emission on every track.
    pub fn play_streams(&self) {
        for stream in self.streams.lock().iter_mut() {
            stream.play();
        }
    }

    /// Suspend emission on every track.
    pub fn pause_streams(&self) {
        for stream in self.streams.lock().iter_mut() {
            stream.pause();
        }
    }

    /// Tear down every track, closing transports and releasing ports.
    pub fn teardown_streams(&self) {
        for stream in self.streams.lock().iter_mut() {
            stream.teardown();
        }
        self.streams.lock().clear();
    }

    /// Deliver a frame to the track carrying its codec.
    ///
    /// Returns `false` when no playing track accepts the frame.
    pub fn push_frame(&self, frame: &MediaFrame) -> bool {
        let mut delivered = false;
        for stream in self.streams.lock().iter_mut() {
            if stream.codec() == frame.codec && stream.push_frame(frame).is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    /// `RTP-Info` entries for the PLAY response, one per track in SETUP
    /// order.
    ///
    /// Before any packet has been sent the sequence and timestamp reflect
    /// the packetizer's random initial values, which RFC 2326 permits.
    pub fn rtp_info(&self) -> String {
        self.streams
            .lock()
            .iter()
            .map(|s| {
                format!(
                    "url={};seq={};rtptime={}",
                    s.track_uri(),
                    s.next_sequence(),
                    s.rtp_timestamp()
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Route an inbound interleaved RTCP frame to the owning track.
    pub fn handle_interleaved_rtcp(&self, channel: u8, data: &[u8], now_ms: u64) {
        for stream in self.streams.lock().iter_mut() {
            if stream.rtcp_channel() == Some(channel) {
                stream.handle_rtcp(data, now_ms);
                return;
            }
        }
        tracing::debug!(channel, "interleaved RTCP for unknown channel");
    }
}

/// Thread-safe registry of active sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session for the given URI and register it.
    pub fn create_session(&self, uri: &str, now_ms: u64) -> Arc<Session> {
        self.create_session_with_timeout(uri, now_ms, DEFAULT_SESSION_TIMEOUT_SECS)
    }

    /// Create a session with a configured inactivity timeout.
    pub fn create_session_with_timeout(
        &self,
        uri: &str,
        now_ms: u64,
        timeout_secs: u64,
    ) -> Arc<Session> {
        let session = Arc::new(Session::with_timeout(uri, now_ms, timeout_secs));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session.clone());
        tracing::debug!(session_id = %id, uri, "session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session (TEARDOWN or cleanup).
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    /// Remove multiple sessions at once (connection disconnect cleanup).
    pub fn remove_many(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if let Some(session) = sessions.remove(id) {
                session.teardown_streams();
                removed += 1;
            }
        }
        removed
    }

    /// Expire sessions idle past their timeout; returns how many died.
    pub fn expire_stale(&self, now_ms: u64) -> usize {
        let stale: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired(now_ms))
            .map(|s| s.id.clone())
            .collect();
        for id in &stale {
            tracing::info!(session_id = %id, "session expired");
        }
        self.remove_many(&stale)
    }

    pub fn playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_rfc() {
        use MethodOutcome::*;
        use SessionState::*;

        assert_eq!(transition(Init, "SETUP"), Transition(Ready));
        assert_eq!(transition(Init, "PLAY"), NotValid);
        assert_eq!(transition(Init, "PAUSE"), NotValid);
        assert_eq!(transition(Init, "TEARDOWN"), NoOp);

        assert_eq!(transition(Ready, "SETUP"), Transition(Ready));
        assert_eq!(transition(Ready, "PLAY"), Transition(Playing));
        assert_eq!(transition(Ready, "PAUSE"), NotValid);
        assert_eq!(transition(Ready, "TEARDOWN"), Transition(Init));

        assert_eq!(transition(Playing, "SETUP"), NotValid);
        assert_eq!(transition(Playing, "PLAY"), NoOp);
        assert_eq!(transition(Playing, "PAUSE"), Transition(Paused));
        assert_eq!(transition(Playing, "TEARDOWN"), Transition(Init));

        assert_eq!(transition(Paused, "SETUP"), NotValid);
        assert_eq!(transition(Paused, "PLAY"), Transition(Playing));
        assert_eq!(transition(Paused, "PAUSE"), NoOp);
        assert_eq!(transition(Paused, "TEARDOWN"), Transition(Init));
    }

    #[test]
    fn session_ids_unique() {
        let s1 = Session::new("rtsp://h/a", 0);
        let s2 = Session::new("rtsp://h/a", 0);
        assert_ne!(s1.id, s2.id);
        assert_eq!(s1.id.len(), 8);
    }

    #[test]
    fn header_value_includes_timeout() {
        let session = Session::new("rtsp://h/a", 0);
        assert_eq!(
            session.header_value(),
            format!("{};timeout=60", session.id)
        );
    }

    #[test]
    fn expiry_honors_touch() {
        let session = Session::new("rtsp://h/a", 0);
        assert!(!session.is_expired(59_000));
        assert!(session.is_expired(61_000));
        session.touch(61_000);
        assert!(!session.is_expired(100_000));
        assert!(session.is_expired(122_000));
    }

    #[test]
    fn manager_lifecycle() {
        let manager = SessionManager::new();
        let session = manager.create_session("rtsp://h/s", 0);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&session.id).is_some());

        assert!(manager.remove(&session.id).is_some());
        assert!(manager.get(&session.id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn stale_sessions_expire() {
        let manager = SessionManager::new();
        let old = manager.create_session("rtsp://h/a", 0);
        let fresh = manager.create_session("rtsp://h/b", 100_000);

        assert_eq!(manager.expire_stale(100_000), 1);
        assert!(manager.get(&old.id).is_none());
        assert!(manager.get(&fresh.id).is_some());
    }

    #[test]
    fn playing_filter() {
        let manager = SessionManager::new();
        let a = manager.create_session("rtsp://h/a", 0);
        let _b = manager.create_session("rtsp://h/b", 0);
        a.set_state(SessionState::Playing);
        let playing = manager.playing_sessions();
        assert_eq!(playing.len(), 1);
        assert_eq!(playing[0].id, a.id);
    }
}
