//! Domain-specific error types for the camrelay protocol.
//!
//! All fallible operations return `Result<T, CamError>`. Every variant maps
//! onto one [`FailureKind`] so callers can make flow-control decisions
//! (retry on timeout, drop the connection on anything else) without
//! matching on individual variants.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for camrelay.
#[derive(Debug, Error)]
pub enum CamError {
    // ── Timeout ──────────────────────────────────────────────────
    /// No data became ready within the deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The peer closed the stream, or the connection was already closed
    /// locally.
    #[error("connection closed")]
    ConnectionClosed,

    // ── Protocol Errors ──────────────────────────────────────────
    /// A length header announced more bytes than the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A connection was driven through an invalid phase transition.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The peer answered the handshake with something other than a
    /// known marker.
    #[error("unexpected handshake marker ({0} bytes)")]
    UnexpectedMarker(usize),

    /// Encoding or decoding of a frame failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Auth Errors ──────────────────────────────────────────────
    /// The challenge response did not match, or the server refused the
    /// login.
    #[error("authentication failed")]
    AuthFailed,

    // ── Local Errors ─────────────────────────────────────────────
    /// The operation was abandoned because the service is shutting down.
    #[error("operation cancelled")]
    Cancelled,

    /// `start` was called on a component that is already running.
    #[error("already running")]
    AlreadyRunning,

    /// The client has no open connection.
    #[error("not connected")]
    NotConnected,

    /// The credential provider could not produce a secret.
    #[error("credential error: {0}")]
    Credential(String),

    /// The frame source failed to open or capture.
    #[error("frame source error: {0}")]
    Source(String),

    /// The frame sink failed to display a frame.
    #[error("frame sink error: {0}")]
    Sink(String),

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

// ── FailureKind ───────────────────────────────────────────────────

/// Coarse classification of a [`CamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Recoverable: nothing arrived in time, the caller decides.
    Timeout,
    /// Socket-level failure, generally fatal to the connection.
    Transport,
    /// Malformed data or an invalid exchange, fatal to the connection.
    Protocol,
    /// Digest mismatch or refused login, fatal to the connection.
    Auth,
    /// Local failure that never came off the wire.
    Local,
}

impl CamError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Connection(_) | Self::ConnectionClosed => FailureKind::Transport,
            Self::FrameTooLarge { .. }
            | Self::ProtocolViolation(_)
            | Self::UnexpectedMarker(_)
            | Self::Encoding(_) => FailureKind::Protocol,
            Self::AuthFailed => FailureKind::Auth,
            Self::Cancelled
            | Self::AlreadyRunning
            | Self::NotConnected
            | Self::Credential(_)
            | Self::Source(_)
            | Self::Sink(_)
            | Self::Config(_) => FailureKind::Local,
        }
    }

    /// `true` for [`FailureKind::Timeout`].
    pub fn is_timeout(&self) -> bool {
        self.kind() == FailureKind::Timeout
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<Box<bincode::ErrorKind>> for CamError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CamError::Encoding(e.to_string())
    }
}
