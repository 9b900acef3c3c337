//! Tracking for per-connection handler tasks.
//!
//! The accept loop never waits on a handler; it hands each one to a
//! [`HandlerPool`] and keeps polling. On shutdown the pool cancels its
//! token and joins every task, so nothing outlives the acceptor.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub struct HandlerPool {
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
}

impl HandlerPool {
    /// Create a pool whose tasks are cancelled through `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    /// Token handed to every connection spawned into this pool.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn a handler future onto the runtime.
    pub fn spawn<F>(&mut self, handler: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(handler);
    }

    /// Collect finished tasks without waiting. Returns how many were reaped.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(result) = self.tasks.try_join_next() {
            Self::log_exit(result);
            reaped += 1;
        }
        reaped
    }

    /// Number of handlers still running.
    pub fn active(&mut self) -> usize {
        self.reap();
        self.tasks.len()
    }

    /// Cancel every handler and wait for all of them to return.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next().await {
            Self::log_exit(result);
        }
    }

    fn log_exit(result: Result<(), tokio::task::JoinError>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_panic() => error!("connection handler panicked: {e}"),
            Err(e) => warn!("connection handler aborted: {e}"),
        }
    }
}
