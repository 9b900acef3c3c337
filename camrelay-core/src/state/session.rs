//! Per-connection session state machine.
//!
//! Models the lifecycle of one accepted or dialled connection, with
//! validated transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::CamError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a connection.
///
/// ```text
///  Unauthenticated ──► Authenticated ──► Closed
///         │                                ▲
///         └────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Transport is up, the handshake has not succeeded yet.
    #[default]
    Unauthenticated,

    /// Handshake succeeded; frames may flow.
    Authenticated {
        /// When the session entered the `Authenticated` state.
        since: Instant,
    },

    /// Terminal. Reached from any phase, any number of times.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Unauthenticated"),
            Self::Authenticated { .. } => write!(f, "Authenticated"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been authenticated.
    ///
    /// Returns `None` for any other phase.
    pub fn authenticated_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Authenticated { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Authenticated`.
    ///
    /// Valid from: `Unauthenticated`.
    pub fn authenticate(&mut self) -> Result<(), CamError> {
        match self {
            Self::Unauthenticated => {
                *self = Self::Authenticated {
                    since: Instant::now(),
                };
                Ok(())
            }
            Self::Authenticated { .. } => Err(CamError::ProtocolViolation(
                "cannot authenticate: session already authenticated",
            )),
            Self::Closed => Err(CamError::ProtocolViolation(
                "cannot authenticate: session closed",
            )),
        }
    }

    /// Transition to `Closed`.
    ///
    /// Returns `true` if this call performed the transition, `false` if
    /// the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Self::Closed;
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────
