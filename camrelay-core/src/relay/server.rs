//! Server half of the relay: log the viewer in, then push new frames.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth::{self, Secret};
use crate::error::CamError;
use crate::frame::{FrameSlot, SharedFrame};
use crate::network::{Connection, ConnectionHandler};

/// Configuration for [`RelayHandler`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the slot is checked for a new frame.
    pub poll_interval: Duration,
    /// How long the viewer has to answer the challenge.
    pub handshake_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

/// Why [`relay_frames`] returned.
#[derive(Debug)]
pub enum RelayEnd {
    /// The service is shutting down.
    Shutdown,
    /// Sending a frame failed; the viewer is gone.
    SendFailed(CamError),
}

/// Counters from one relay session.
#[derive(Debug)]
pub struct RelayStats {
    pub frames_sent: u64,
    /// Polls that found no frame, or the frame already sent.
    pub polls_skipped: u64,
    pub end: RelayEnd,
}

/// Push every new frame in `slot` to an authenticated viewer.
///
/// Each poll reads the slot and sends its frame unless it is the very frame
/// sent last time (compared by identity, not content). Returns when a send
/// fails or the connection's shutdown token fires. The caller closes the
/// connection.
pub async fn relay_frames<S>(
    conn: &mut Connection<S>,
    slot: &FrameSlot,
    poll_interval: Duration,
) -> Result<RelayStats, CamError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !conn.phase().is_authenticated() {
        return Err(CamError::ProtocolViolation(
            "frames requested before authentication",
        ));
    }

    let shutdown = conn.shutdown_token().clone();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_sent: Option<SharedFrame> = None;
    let mut frames_sent = 0;
    let mut polls_skipped = 0;

    let end = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break RelayEnd::Shutdown,
            _ = ticker.tick() => {}
        }

        let Some(frame) = slot.latest() else {
            polls_skipped += 1;
            continue;
        };
        if last_sent.as_ref().is_some_and(|prev| prev.same_as(&frame)) {
            polls_skipped += 1;
            continue;
        }

        match conn.send(frame.as_bytes()).await {
            Ok(()) => {
                frames_sent += 1;
                last_sent = Some(frame);
            }
            Err(CamError::Cancelled) => break RelayEnd::Shutdown,
            Err(e) => break RelayEnd::SendFailed(e),
        }
    };

    Ok(RelayStats {
        frames_sent,
        polls_skipped,
        end,
    })
}

// ── RelayHandler ─────────────────────────────────────────────────

/// Per-connection handler: handshake, then relay until the viewer leaves.
pub struct RelayHandler {
    secret: Secret,
    slot: FrameSlot,
    config: RelayConfig,
}

impl RelayHandler {
    pub fn new(secret: Secret, slot: FrameSlot, config: RelayConfig) -> Self {
        Self {
            secret,
            slot,
            config,
        }
    }
}

#[async_trait]
impl ConnectionHandler for RelayHandler {
    async fn on_connect(&self, mut conn: Connection<TcpStream>) {
        let peer = conn.peer();
        debug!(%peer, "viewer connected");

        match auth::verify_client(&mut conn, &self.secret, self.config.handshake_timeout).await {
            Ok(()) => info!(%peer, "login succeeded"),
            Err(CamError::AuthFailed) => {
                warn!(%peer, "login failed: wrong response");
                return;
            }
            Err(e) => {
                warn!(%peer, "login failed: {e}");
                return;
            }
        }

        match relay_frames(&mut conn, &self.slot, self.config.poll_interval).await {
            Ok(stats) => {
                let session_ms = conn
                    .phase()
                    .authenticated_duration()
                    .map_or(0, |d| d.as_millis() as u64);
                info!(
                    %peer,
                    frames_sent = stats.frames_sent,
                    polls_skipped = stats.polls_skipped,
                    session_ms,
                    "stream ended: {:?}",
                    stats.end
                );
            }
            Err(e) => warn!(%peer, "relay refused: {e}"),
        }

        conn.close().await;
    }
}
