use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec, HEADER_LEN};
use crate::error::CamError;
use crate::state::SessionPhase;

/// Upper bound on the graceful shutdown of a socket in [`Connection::close`].
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Frame limit until the handshake succeeds. Challenges, digests and
/// markers all fit well inside it.
pub const UNAUTHENTICATED_MAX_FRAME_LEN: usize = 1024;

/// Transport limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest payload accepted or sent, in bytes.
    pub max_frame_len: usize,
    /// Deadline for writing one whole message.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// A framed connection to a single peer.
///
/// Every message on the wire is `[u32 big-endian length][payload]`.
/// [`send`](Self::send) and [`receive`](Self::receive) never panic on socket
/// trouble; they hand back a [`CamError`] whose [`kind`](CamError::kind)
/// tells the caller whether to retry or give up.
pub struct Connection<S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    codec: FrameCodec,
    max_frame_len: usize,
    read_buf: BytesMut,
    write_timeout: Duration,
    phase: SessionPhase,
    shutdown: CancellationToken,
}

impl Connection<TcpStream> {
    /// Dial `addr`, giving up after `connect_timeout`.
    pub async fn connect(
        addr: &str,
        config: &ConnectionConfig,
        connect_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, CamError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CamError::Timeout(connect_timeout))??;
        Self::from_tcp(stream, config, shutdown)
    }

    /// Wrap an accepted or dialled TCP stream.
    pub fn from_tcp(
        stream: TcpStream,
        config: &ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, CamError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, peer, config, shutdown))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: &ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer,
            codec: FrameCodec::new(config.max_frame_len.min(UNAUTHENTICATED_MAX_FRAME_LEN)),
            max_frame_len: config.max_frame_len,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_timeout: config.write_timeout,
            phase: SessionPhase::Unauthenticated,
            shutdown,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_closed()
    }

    /// Record a successful handshake and lift the frame limit to the
    /// configured maximum.
    pub fn mark_authenticated(&mut self) -> Result<(), CamError> {
        self.phase.authenticate()?;
        self.codec = FrameCodec::new(self.max_frame_len);
        Ok(())
    }

    /// Token that aborts pending I/O on this connection when cancelled.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Send one length-prefixed message.
    ///
    /// Partial writes are retried until the whole buffer is out, the
    /// write timeout elapses, or the socket fails.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), CamError> {
        if self.phase.is_closed() {
            return Err(CamError::ConnectionClosed);
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        self.codec.encode(payload, &mut buf)?;

        let stream = &mut self.stream;
        let write_timeout = self.write_timeout;
        let write = async move {
            stream.write_all(&buf).await?;
            stream.flush().await
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CamError::Cancelled),
            result = tokio::time::timeout(write_timeout, write) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CamError::Connection(e)),
                Err(_) => Err(CamError::Timeout(write_timeout)),
            },
        }
    }

    /// Receive one message.
    ///
    /// Waits at most `timeout` for each chunk of bytes, so a sender that
    /// keeps trickling data cannot hold a single wait open past the
    /// deadline. Bytes from a frame interrupted by a timeout stay buffered
    /// and the next call resumes from them.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, CamError> {
        if self.phase.is_closed() {
            return Err(CamError::ConnectionClosed);
        }

        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(payload)) => return Ok(payload.freeze()),
                Ok(None) => {}
                Err(e) => {
                    // The stream is desynchronised past this point.
                    self.read_buf.clear();
                    return Err(e);
                }
            }

            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(CamError::Cancelled),
                result = tokio::time::timeout(timeout, self.stream.read_buf(&mut self.read_buf)) => result,
            };

            match read {
                Err(_) => return Err(CamError::Timeout(timeout)),
                Ok(Ok(0)) => return Err(CamError::ConnectionClosed),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(CamError::Connection(e)),
            }
        }
    }

    /// Shut the connection down.
    ///
    /// Idempotent and infallible from the caller's point of view: errors
    /// from the underlying socket are logged and dropped.
    pub async fn close(&mut self) {
        if !self.phase.close() {
            return;
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %self.peer, "ignoring error on close: {e}"),
            Err(_) => debug!(peer = %self.peer, "socket shutdown timed out"),
        }
        self.read_buf.clear();
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("phase", &self.phase)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn peer() -> SocketAddr {
        "127.0.0.1:1895".parse().unwrap()
    }

    /// Two logged-in ends of a pipe.
    fn pair() -> (Connection<DuplexStream>, Connection<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let config = ConnectionConfig::default();
        let mut left = Connection::new(a, peer(), &config, CancellationToken::new());
        let mut right = Connection::new(b, peer(), &config, CancellationToken::new());
        left.mark_authenticated().unwrap();
        right.mark_authenticated().unwrap();
        (left, right)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn payloads_round_trip_including_empty() {
        let (mut left, mut right) = pair();
        let payloads: [&[u8]; 4] = [b"", b"x", b"hello world", &[0u8; 70_000]];

        let writer = tokio::spawn(async move {
            for p in payloads {
                left.send(p).await.unwrap();
            }
            left
        });

        for p in payloads {
            let got = right.receive(WAIT).await.unwrap();
            assert_eq!(&got[..], p);
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn send_writes_prefix_then_payload() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 4, b'S', b'U', b'C', b'C'])
            .build();
        let mut conn = Connection::new(
            mock,
            peer(),
            &ConnectionConfig::default(),
            CancellationToken::new(),
        );
        conn.send(b"SUCC").await.unwrap();
    }

    #[tokio::test]
    async fn receive_reassembles_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 5, b'f'])
            .wait(Duration::from_millis(20))
            .read(b"rame")
            .build();
        let mut conn = Connection::new(
            mock,
            peer(),
            &ConnectionConfig::default(),
            CancellationToken::new(),
        );
        let got = conn.receive(WAIT).await.unwrap();
        assert_eq!(&got[..], b"frame");
    }

    #[tokio::test]
    async fn silence_is_a_timeout_and_leaves_connection_open() {
        let (mut left, mut right) = pair();
        let err = right.receive(Duration::from_millis(30)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!right.is_closed());

        left.send(b"late").await.unwrap();
        assert_eq!(&right.receive(WAIT).await.unwrap()[..], b"late");
    }

    #[tokio::test]
    async fn partial_frame_survives_a_timeout() {
        let (a, b) = tokio::io::duplex(1024);
        let mut raw = a;
        let mut conn = Connection::new(
            b,
            peer(),
            &ConnectionConfig::default(),
            CancellationToken::new(),
        );

        raw.write_all(&[0, 0, 0, 6, b'a', b'b', b'c']).await.unwrap();
        let err = conn.receive(Duration::from_millis(30)).await.unwrap_err();
        assert!(err.is_timeout());

        raw.write_all(b"def").await.unwrap();
        assert_eq!(&conn.receive(WAIT).await.unwrap()[..], b"abcdef");
    }

    #[tokio::test]
    async fn oversized_length_header_is_a_protocol_error() {
        let (a, b) = tokio::io::duplex(1024);
        let mut raw = a;
        let config = ConnectionConfig {
            max_frame_len: 8,
            ..Default::default()
        };
        let mut conn = Connection::new(b, peer(), &config, CancellationToken::new());

        raw.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3]).await.unwrap();
        let err = conn.receive(WAIT).await.unwrap_err();
        assert!(matches!(err, CamError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn large_frames_are_refused_until_login() {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let mut raw = a;
        let mut conn = Connection::new(
            b,
            peer(),
            &ConnectionConfig::default(),
            CancellationToken::new(),
        );

        // Header alone is enough to be refused.
        raw.write_all(&[0x03, 0xFF, 0xFF, 0xFF]).await.unwrap();
        let err = conn.receive(WAIT).await.unwrap_err();
        assert!(matches!(
            err,
            CamError::FrameTooLarge {
                max: UNAUTHENTICATED_MAX_FRAME_LEN,
                ..
            }
        ));
        assert!(conn.send(&[0u8; 2048]).await.is_err());

        conn.mark_authenticated().unwrap();
        let big = vec![7u8; 4096];
        raw.write_all(&(big.len() as u32).to_be_bytes()).await.unwrap();
        raw.write_all(&big).await.unwrap();
        assert_eq!(&conn.receive(WAIT).await.unwrap()[..], &big[..]);
    }

    #[tokio::test]
    async fn peer_hangup_is_a_transport_error() {
        let (mut left, mut right) = pair();
        left.close().await;
        drop(left);
        let err = right.receive(WAIT).await.unwrap_err();
        assert!(matches!(err, CamError::ConnectionClosed));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_io() {
        let (mut left, _right) = pair();
        left.close().await;
        left.close().await;
        assert!(left.is_closed());
        assert!(matches!(
            left.send(b"x").await,
            Err(CamError::ConnectionClosed)
        ));
        assert!(matches!(
            left.receive(WAIT).await,
            Err(CamError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_waiting_receive() {
        let (a, _b) = tokio::io::duplex(1024);
        let token = CancellationToken::new();
        let mut conn = Connection::new(a, peer(), &ConnectionConfig::default(), token.clone());

        let waiter = tokio::spawn(async move { conn.receive(Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(CamError::Cancelled)));
    }
}
