//! Listening side: bind, poll for connections, dispatch handlers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DEFAULT_PORT;
use crate::error::CamError;
use crate::network::connection::{Connection, ConnectionConfig};
use crate::task::HandlerPool;

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// OS error codes meaning the listening socket itself is gone.
#[cfg(unix)]
const LISTENER_GONE_CODES: &[i32] = &[9]; // EBADF
#[cfg(windows)]
const LISTENER_GONE_CODES: &[i32] = &[10038]; // WSAENOTSOCK
#[cfg(not(any(unix, windows)))]
const LISTENER_GONE_CODES: &[i32] = &[];

// ── ConnectionHandler ────────────────────────────────────────────

/// Receives every accepted connection, each on its own task.
///
/// The handler owns the connection and is responsible for closing it.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn on_connect(&self, conn: Connection<TcpStream>);
}

// ── AcceptorConfig ───────────────────────────────────────────────

/// Configuration for [`Acceptor`].
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Address to bind; `0.0.0.0` listens on all interfaces.
    pub bind_address: IpAddr,
    /// TCP port; 0 lets the OS pick one.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// How long one accept poll waits before re-checking the stop flag.
    pub poll_interval: Duration,
    /// Maximum concurrent connections; 0 means unlimited.
    pub max_connections: usize,
    /// Transport limits for accepted connections.
    pub connection: ConnectionConfig,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: 5,
            poll_interval: Duration::from_secs(1),
            max_connections: 0,
            connection: ConnectionConfig::default(),
        }
    }
}

// ── Acceptor ─────────────────────────────────────────────────────

/// Accepts TCP connections and runs a [`ConnectionHandler`] for each.
///
/// # Lifetime
///
/// [`start`](Self::start) binds and spawns the accept loop;
/// [`stop`](Self::stop) closes the listener and waits for the loop and all
/// handlers to return. Dropping a running acceptor signals the loop to stop
/// but does not wait for it.
pub struct Acceptor {
    config: AcceptorConfig,
    handler: Arc<dyn ConnectionHandler>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Acceptor {
    pub fn new(config: AcceptorConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            config,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Bind the listening socket and launch the accept loop.
    ///
    /// Returns the bound address. Must be called from within a Tokio
    /// runtime.
    pub fn start(&mut self) -> Result<SocketAddr, CamError> {
        if self.task.is_some() {
            return Err(CamError::AlreadyRunning);
        }

        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;

        self.shutdown = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(local_addr);

        self.task = Some(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.handler),
            self.config.clone(),
            self.shutdown.clone(),
            Arc::clone(&self.running),
        )));

        info!("listening on {local_addr}");
        Ok(local_addr)
    }

    /// Stop accepting, close the listener and wait for every handler.
    ///
    /// Idempotent.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("accept loop ended abnormally: {e}");
            }
            info!("acceptor stopped");
        }
        self.local_addr = None;
    }

    /// Whether the accept loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn bind(&self) -> Result<TcpListener, CamError> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(self.config.backlog)?)
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

// ── Accept loop ──────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    config: AcceptorConfig,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut pool = HandlerPool::new(shutdown.child_token());

    while running.load(Ordering::SeqCst) {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = tokio::time::timeout(config.poll_interval, listener.accept()) => result,
        };
        pool.reap();

        let (stream, peer) = match accepted {
            // Idle poll; go round and re-check the stop flag.
            Err(_) => continue,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) if listener_gone(&e) => {
                info!("listening socket closed; accept loop exiting");
                break;
            }
            Ok(Err(e)) => {
                warn!("accept error: {e}");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        if config.max_connections > 0 && pool.active() >= config.max_connections {
            warn!(%peer, "connection limit ({}) reached; dropping", config.max_connections);
            continue;
        }

        let conn = match Connection::from_tcp(stream, &config.connection, pool.token()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%peer, "could not set up connection: {e}");
                continue;
            }
        };

        debug!(%peer, "accepted connection");
        let handler = Arc::clone(&handler);
        pool.spawn(async move { handler.on_connect(conn).await });
    }

    running.store(false, Ordering::SeqCst);
    drop(listener);
    pool.shutdown().await;
    debug!("accept loop exited");
}

fn listener_gone(e: &std::io::Error) -> bool {
    e.raw_os_error()
        .is_some_and(|code| LISTENER_GONE_CODES.contains(&code))
}

// ── Tests ────────────────────────────────────────────────────────
