//! Server lifecycle: one frame producer feeding one acceptor.
//!
//! ```text
//! FrameSource ─► FrameProducer ─► FrameSlot ◄─ RelayHandler (per viewer) ◄─ Acceptor
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use camrelay_core::{
    Acceptor, CamError, FrameProducer, FrameSlot, FrameSource, RelayHandler, Secret,
};

use crate::config::ServerConfig;

/// The whole server: capture, listen, relay.
pub struct CamServer {
    producer: FrameProducer,
    acceptor: Acceptor,
}

impl CamServer {
    /// Wire a source and a secret into a server. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        config: &ServerConfig,
        source: Box<dyn FrameSource>,
        secret: Secret,
    ) -> Result<Self, CamError> {
        let slot = FrameSlot::new();
        let producer = FrameProducer::new(source, slot.clone(), config.to_producer_config());
        let handler = RelayHandler::new(secret, slot, config.to_relay_config());
        let acceptor = Acceptor::new(config.to_acceptor_config()?, Arc::new(handler));
        Ok(Self { producer, acceptor })
    }

    /// Start capturing, then start listening. Returns the bound address.
    ///
    /// If the listener cannot be bound the producer is stopped again.
    pub async fn start(&mut self) -> Result<SocketAddr, CamError> {
        self.producer.start()?;
        match self.acceptor.start() {
            Ok(addr) => {
                info!("camrelay server ready on {addr}");
                Ok(addr)
            }
            Err(e) => {
                self.producer.stop().await;
                Err(e)
            }
        }
    }

    /// Stop accepting, end every relay, then stop capturing. Idempotent.
    pub async fn stop(&mut self) {
        self.acceptor.stop().await;
        self.producer.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.acceptor.is_running()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }
}
