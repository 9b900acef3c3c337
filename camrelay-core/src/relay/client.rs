//! Viewer half of the relay: connect, log in, receive and display frames.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{self, Secret};
use crate::error::CamError;
use crate::frame::{Frame, FrameSink};
use crate::network::{Connection, ConnectionConfig};

/// Configuration for [`StreamClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Wait for one frame before it counts as a miss.
    pub receive_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Consecutive misses after which the client disconnects.
    pub max_misses: u32,
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            max_misses: 3,
            connection: ConnectionConfig::default(),
        }
    }
}

// ── MissCounter ──────────────────────────────────────────────────

/// Counts consecutive failed receives. A success resets it.
#[derive(Debug, Clone)]
pub struct MissCounter {
    consecutive: u32,
    limit: u32,
}

impl MissCounter {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    /// Record a miss. Returns `true` once the limit is reached.
    pub fn record_miss(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    pub fn record_hit(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

// ── StreamClient ─────────────────────────────────────────────────

/// Why [`StreamClient::stream`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Too many consecutive misses; the client disconnected.
    MissLimit,
    /// The shutdown handle was triggered.
    Cancelled,
    /// There was no live connection to stream from.
    NotConnected,
}

/// Outcome of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_received: u64,
    /// Total misses, consecutive or not.
    pub misses: u64,
    pub display_errors: u64,
    pub end: StreamEnd,
}

/// A viewer connection to a camrelay server.
pub struct StreamClient<S = TcpStream> {
    conn: Option<Connection<S>>,
    config: ClientConfig,
    shutdown: CancellationToken,
}

impl StreamClient<TcpStream> {
    /// Dial the server at `addr` (`host:port`).
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self, CamError> {
        let shutdown = CancellationToken::new();
        let conn = Connection::connect(
            addr,
            &config.connection,
            config.connect_timeout,
            shutdown.clone(),
        )
        .await?;
        info!(peer = %conn.peer(), "connected");
        Ok(Self {
            conn: Some(conn),
            config,
            shutdown,
        })
    }
}

impl<S> StreamClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an existing connection. Its shutdown token becomes the
    /// client's shutdown handle.
    pub fn from_connection(conn: Connection<S>, config: ClientConfig) -> Self {
        let shutdown = conn.shutdown_token().clone();
        Self {
            conn: Some(conn),
            config,
            shutdown,
        }
    }

    /// Answer the server's challenge with `secret`.
    ///
    /// On failure the connection is closed and dropped.
    pub async fn login(&mut self, secret: &Secret) -> Result<(), CamError> {
        let conn = self.conn.as_mut().ok_or(CamError::NotConnected)?;
        match auth::login(conn, secret, self.config.handshake_timeout).await {
            Ok(()) => {
                info!(peer = %conn.peer(), "login succeeded");
                Ok(())
            }
            Err(e) => {
                self.conn = None;
                Err(e)
            }
        }
    }

    /// Receive frames and hand each one to `sink` until the miss limit is
    /// reached or the client is shut down.
    ///
    /// A receive timeout, transport error or undecodable message is a miss.
    /// A sink error is logged and counted but is not a miss. The client is
    /// disconnected when this returns.
    pub async fn stream(&mut self, sink: &mut dyn FrameSink) -> StreamSummary {
        let mut summary = StreamSummary {
            frames_received: 0,
            misses: 0,
            display_errors: 0,
            end: StreamEnd::NotConnected,
        };
        let Some(conn) = self.conn.as_mut() else {
            return summary;
        };
        if !conn.phase().is_authenticated() {
            warn!("stream requested before login");
            return summary;
        }

        let mut counter = MissCounter::new(self.config.max_misses);
        summary.end = loop {
            let failure = match conn.receive(self.config.receive_timeout).await {
                Ok(bytes) => match Frame::from_bytes(&bytes) {
                    Ok(frame) => {
                        counter.record_hit();
                        summary.frames_received += 1;
                        if let Err(e) = sink.display(frame) {
                            summary.display_errors += 1;
                            warn!("could not display frame: {e}");
                        }
                        continue;
                    }
                    Err(e) => e,
                },
                Err(CamError::Cancelled) => break StreamEnd::Cancelled,
                Err(e) => e,
            };

            summary.misses += 1;
            debug!(
                consecutive = counter.consecutive() + 1,
                "missed frame: {failure}"
            );
            if counter.record_miss() {
                warn!(
                    misses = counter.consecutive(),
                    "too many consecutive misses; disconnecting"
                );
                break StreamEnd::MissLimit;
            }
        };

        self.disconnect().await;
        summary
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
            info!(peer = %conn.peer(), "disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Cancelling this token ends a running [`stream`](Self::stream) and
    /// aborts pending I/O.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use tokio::io::DuplexStream;

    use crate::frame::FrameFormat;

    fn peer() -> SocketAddr {
        "127.0.0.1:1895".parse().unwrap()
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            receive_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// A logged-in client and the server end of its pipe.
    fn logged_in() -> (StreamClient<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let config = ConnectionConfig::default();
        let mut conn = Connection::new(a, peer(), &config, CancellationToken::new());
        conn.mark_authenticated().unwrap();
        let server = Connection::new(b, peer(), &config, CancellationToken::new());
        (StreamClient::from_connection(conn, fast_config()), server)
    }

    fn sink<F>(f: F) -> F
    where
        F: FnMut(Frame) -> Result<(), CamError> + Send,
    {
        f
    }

    fn frame_bytes(seq: u64) -> Vec<u8> {
        Frame {
            seq,
            captured_at_ms: 0,
            width: 1,
            height: 1,
            format: FrameFormat::Raw,
            data: vec![seq as u8],
        }
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn counter_cuts_off_after_three_consecutive_misses() {
        let mut counter = MissCounter::new(3);
        assert!(!counter.record_miss());
        assert!(!counter.record_miss());
        counter.record_hit();
        assert!(!counter.record_miss());
        assert!(!counter.record_miss());
        assert!(counter.record_miss());
    }

    #[test]
    fn zero_limit_is_clamped() {
        let mut counter = MissCounter::new(0);
        assert!(counter.record_miss());
    }

    #[tokio::test]
    async fn garbage_and_silence_both_count_as_misses() {
        let (mut client, mut server) = logged_in();
        let mut seen = Vec::new();

        // fail, fail, success, fail, fail, fail
        server.send(b"not a frame").await.unwrap();
        server.send(b"\x00").await.unwrap();
        server.send(&frame_bytes(7)).await.unwrap();
        server.send(b"junk").await.unwrap();
        // Two more misses come from the receive timeout.

        let summary = client
            .stream(&mut sink(|frame| {
                seen.push(frame.seq);
                Ok(())
            }))
            .await;

        assert_eq!(seen, vec![7]);
        assert_eq!(summary.frames_received, 1);
        assert_eq!(summary.misses, 5);
        assert_eq!(summary.end, StreamEnd::MissLimit);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn sink_errors_are_not_misses() {
        let (mut client, mut server) = logged_in();
        for seq in 0..4 {
            server.send(&frame_bytes(seq)).await.unwrap();
        }

        let summary = client
            .stream(&mut sink(|_frame| Err(CamError::Sink("disk full".into()))))
            .await;

        assert_eq!(summary.frames_received, 4);
        assert_eq!(summary.display_errors, 4);
        assert_eq!(summary.misses, 3);
    }

    #[tokio::test]
    async fn shutdown_handle_ends_the_stream() {
        let (mut client, _server) = logged_in();
        let mut config = fast_config();
        config.receive_timeout = Duration::from_secs(60);
        client.config = config;

        let handle = client.shutdown_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            client.stream(&mut sink(|_frame| Ok(()))),
        )
        .await
        .unwrap();
        assert_eq!(summary.end, StreamEnd::Cancelled);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn streaming_without_a_connection_returns_at_once() {
        let (mut client, _server) = logged_in();
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());

        let summary = client.stream(&mut sink(|_frame| Ok(()))).await;
        assert_eq!(summary.end, StreamEnd::NotConnected);
        assert!(matches!(
            client.login(&Secret::from("pw")).await,
            Err(CamError::NotConnected)
        ));
    }
}
