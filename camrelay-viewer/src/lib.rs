//! # camrelay-viewer: webcam stream viewer
//!
//! Connects to a camrelay server, answers its challenge, and hands every
//! received frame to a [`FrameSink`](camrelay_core::FrameSink). The bundled
//! sink writes frames to a directory, keeping `latest.<ext>` current.

pub mod config;
pub mod sink;
