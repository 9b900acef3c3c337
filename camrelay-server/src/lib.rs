//! # camrelay-server: webcam streaming server
//!
//! Captures frames from a [`FrameSource`](camrelay_core::FrameSource) and
//! streams the latest one to every viewer that proves it knows the shared
//! secret.
//!
//! The built-in sources need no camera: a moving test pattern and a
//! directory of images played in a loop.

pub mod config;
pub mod service;
pub mod sources;
