//! Challenge-response login.
//!
//! # Wire Protocol
//!
//! ```text
//! Server ──[challenge: 128 × [A-Za-z0-9]]──► Client
//! Client ──[hex(sha512(secret ‖ challenge))]──► Server
//! Server ──["SUCC" | "FAIL"]──────────────────► Client
//! ```
//!
//! The server closes the connection right after `"FAIL"`.
//!
//! This proves the client knows the secret without sending it. It is not
//! mutual authentication: there is no forward secrecy, an active relay can
//! forward a challenge and its answer verbatim, and failed guesses are not
//! rate limited.

pub mod credential;

use std::fmt;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha512};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::CamError;
use crate::network::Connection;

pub use credential::{
    CredentialProvider, EnvCredential, FirstAvailable, PromptCredential, Secret,
    StaticCredential,
};

/// Number of characters in a challenge.
pub const CHALLENGE_LEN: usize = 128;

/// Sent by the server after a correct response.
pub const SUCCESS_MARKER: &[u8] = b"SUCC";

/// Sent by the server after a wrong or missing response.
pub const FAILURE_MARKER: &[u8] = b"FAIL";

// ── Challenge ────────────────────────────────────────────────────

/// A one-time login challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// Draw a fresh challenge from the operating system CSPRNG.
    pub fn generate() -> Self {
        Self::from_rng(&mut OsRng)
    }

    /// Draw a challenge from `rng`.
    pub fn from_rng<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let value = rng
            .sample_iter(&Alphanumeric)
            .take(CHALLENGE_LEN)
            .map(char::from)
            .collect();
        Self(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({}…)", &self.0[..8.min(self.0.len())])
    }
}

// ── Digest ───────────────────────────────────────────────────────

/// `hex(sha512(secret ‖ challenge))`, lowercase.
pub fn response_digest(secret: &Secret, challenge: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(secret.expose());
    hasher.update(challenge);
    hex::encode(hasher.finalize())
}

/// Byte comparison whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── HandshakeState ───────────────────────────────────────────────

/// Server-side progress through one login.
///
/// ```text
/// Start ──► ChallengeSent ──► Verified(bool) ──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Start,
    ChallengeSent,
    Verified(bool),
    Closed,
}

// ── Server side ──────────────────────────────────────────────────

/// Run the server half of the handshake on a fresh connection.
///
/// On success the connection is marked authenticated and left open. On any
/// failure `"FAIL"` is sent (best effort), the connection is closed, and the
/// error is returned: [`CamError::AuthFailed`] for a wrong digest, or the
/// transport error that interrupted the exchange.
pub async fn verify_client<S>(
    conn: &mut Connection<S>,
    secret: &Secret,
    timeout: Duration,
) -> Result<(), CamError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut state = HandshakeState::Start;
    let result = run_server_exchange(conn, secret, timeout, &mut state).await;

    if result.is_err() {
        conn.close().await;
        state = HandshakeState::Closed;
    }
    debug!(peer = %conn.peer(), ?state, "handshake finished");
    result
}

async fn run_server_exchange<S>(
    conn: &mut Connection<S>,
    secret: &Secret,
    timeout: Duration,
    state: &mut HandshakeState,
) -> Result<(), CamError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let challenge = Challenge::generate();
    let expected = response_digest(secret, challenge.as_bytes());

    conn.send(challenge.as_bytes()).await?;
    *state = HandshakeState::ChallengeSent;

    let verified = match conn.receive(timeout).await {
        Ok(response) => constant_time_eq(&response, expected.as_bytes()),
        Err(CamError::Cancelled) => return Err(CamError::Cancelled),
        Err(e) => {
            debug!(peer = %conn.peer(), "no handshake response: {e}");
            let _ = conn.send(FAILURE_MARKER).await;
            *state = HandshakeState::Verified(false);
            return Err(e);
        }
    };
    *state = HandshakeState::Verified(verified);

    if !verified {
        let _ = conn.send(FAILURE_MARKER).await;
        return Err(CamError::AuthFailed);
    }

    conn.send(SUCCESS_MARKER).await?;
    conn.mark_authenticated()
}

// ── Client side ──────────────────────────────────────────────────

/// Run the client half of the handshake.
///
/// On success the connection is marked authenticated. On any failure the
/// connection is closed and the error returned.
pub async fn login<S>(
    conn: &mut Connection<S>,
    secret: &Secret,
    timeout: Duration,
) -> Result<(), CamError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let result = run_client_exchange(conn, secret, timeout).await;
    if result.is_err() {
        conn.close().await;
    }
    result
}

async fn run_client_exchange<S>(
    conn: &mut Connection<S>,
    secret: &Secret,
    timeout: Duration,
) -> Result<(), CamError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let challenge = conn.receive(timeout).await?;
    let response = response_digest(secret, &challenge);
    conn.send(response.as_bytes()).await?;

    let marker = conn.receive(timeout).await?;
    if marker.as_ref() == SUCCESS_MARKER {
        conn.mark_authenticated()
    } else if marker.as_ref() == FAILURE_MARKER {
        Err(CamError::AuthFailed)
    } else {
        Err(CamError::UnexpectedMarker(marker.len()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
