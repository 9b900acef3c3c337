//! The post-handshake frame stream, server and viewer halves.

pub mod client;
pub mod server;

pub use client::{ClientConfig, MissCounter, StreamClient, StreamEnd, StreamSummary};
pub use server::{RelayConfig, RelayEnd, RelayHandler, RelayStats, relay_frames};
