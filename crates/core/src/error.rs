//! Error types for the RTSP streaming stack.

use std::fmt;

/// Errors that can occur across the RTSP/RTP/RTCP stack.
///
/// Variants map to specific failure modes:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io), [`PortRangeExhausted`](Self::PortRangeExhausted),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`UnsupportedTransport`](Self::UnsupportedTransport).
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`InvalidState`](Self::InvalidState).
/// - **Media**: [`UnsupportedCodec`](Self::UnsupportedCodec),
///   [`SdpParse`](Self::SdpParse), [`StreamNotFound`](Self::StreamNotFound).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP message (RFC 2326 §6/§7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// No session with the given ID exists in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The requested operation is not valid in the session's current state.
    #[error("operation not valid in state {0}")]
    InvalidState(&'static str),

    /// SETUP has not been completed for this session (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// The Transport header proposed a mode this server does not speak,
    /// or interleaved channels violated the even/odd pairing.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// UDP port-pair allocation ran out of probe attempts.
    #[error("no free RTP/RTCP port pair available")]
    PortRangeExhausted,

    /// The stream's codec has no packetizer/depacketizer in this crate.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The DESCRIBE body could not be understood as a usable SDP.
    #[error("SDP parse error: {0}")]
    SdpParse(String),

    /// No media stream registered at the requested path.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The peer answered with a non-2xx RTSP status.
    #[error("server returned {status} {reason}")]
    Status { status: u16, reason: String },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// Version token did not begin with `RTSP/`.
    InvalidVersion,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Content-Length was present but not a valid integer.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidVersion => write!(f, "invalid RTSP version"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
