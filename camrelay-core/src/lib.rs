//! # camrelay-core
//!
//! Protocol library for the camrelay webcam streamer.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec`, `[u32 big-endian length][payload]` framing via `tokio_util`
//! - **Network**: `Connection` for framed TCP I/O, `Acceptor` for the listening side
//! - **Auth**: SHA-512 challenge-response handshake and credential providers
//! - **Frame**: the `Frame` wire type, the latest-frame `FrameSlot`, `FrameProducer`
//! - **Relay**: the server push loop and the viewer `StreamClient`
//! - **State**: `SessionPhase` for each connection
//! - **Task**: `HandlerPool` for tracking per-connection tasks
//! - **Error**: `CamError`, a `thiserror`-based error with a coarse `FailureKind`

pub mod auth;
pub mod codec;
pub mod error;
pub mod frame;
pub mod network;
pub mod relay;
pub mod state;
pub mod task;

/// TCP port used when none is configured.
pub const DEFAULT_PORT: u16 = 1895;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{
    CredentialProvider, EnvCredential, FirstAvailable, PromptCredential, Secret,
    StaticCredential,
};
pub use codec::FrameCodec;
pub use error::{CamError, FailureKind};
pub use frame::{
    CapturedImage, Frame, FrameFormat, FrameProducer, FrameSink, FrameSlot, FrameSource,
    ProducerConfig, SharedFrame,
};
pub use network::{Acceptor, AcceptorConfig, Connection, ConnectionConfig, ConnectionHandler};
pub use relay::{ClientConfig, RelayConfig, RelayHandler, StreamClient, StreamEnd, StreamSummary};
pub use state::SessionPhase;
pub use task::HandlerPool;
