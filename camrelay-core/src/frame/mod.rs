//! Frames: the wire type, the shared latest-frame slot, and the producer
//! and sink seams at either end of the pipeline.
//!
//! ```text
//! SERVER                                              VIEWER
//! FrameSource ─► FrameProducer ─► FrameSlot ─► relay ═══► StreamClient ─► FrameSink
//!                 (serialise once)  (latest only)          (deserialise)
//! ```

pub mod sink;
pub mod slot;
pub mod source;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CamError;

pub use sink::FrameSink;
pub use slot::FrameSlot;
pub use source::{CapturedImage, FrameProducer, FrameSource, ProducerConfig};

// ── FrameFormat ──────────────────────────────────────────────────

/// Encoding of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameFormat {
    Jpeg,
    Png,
    /// Binary PPM (`P6`).
    Ppm,
    /// Anything the viewer should treat as opaque bytes.
    Raw,
}

impl FrameFormat {
    /// Conventional file extension.
    pub const fn extension(self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
            FrameFormat::Ppm => "ppm",
            FrameFormat::Raw => "bin",
        }
    }

    /// Guess the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(FrameFormat::Jpeg),
            "png" => Some(FrameFormat::Png),
            "ppm" => Some(FrameFormat::Ppm),
            "bin" | "raw" => Some(FrameFormat::Raw),
            _ => None,
        }
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One captured image as it travels over the wire (bincode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Capture sequence number, starting at 0 for each producer run.
    pub seq: u64,
    /// Wall-clock capture time, milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
    /// Width in pixels (0 if unknown).
    pub width: u32,
    /// Height in pixels (0 if unknown).
    pub height: u32,
    pub format: FrameFormat,
    /// Encoded image bytes.
    pub data: Vec<u8>,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CamError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CamError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ── SharedFrame ──────────────────────────────────────────────────

/// An immutable, already-serialised frame shared between the producer
/// and every relay.
///
/// Cloning is cheap. Two handles are [`same_as`](Self::same_as) each other
/// only if they came from the same publish.
#[derive(Clone)]
pub struct SharedFrame(Arc<[u8]>);

impl SharedFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &SharedFrame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<u8>> for SharedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }
}

impl From<&[u8]> for SharedFrame {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

impl TryFrom<&Frame> for SharedFrame {
    type Error = CamError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        Ok(Self::from(frame.to_bytes()?))
    }
}

impl std::fmt::Debug for SharedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFrame")
            .field("len", &self.0.len())
            .finish()
    }
}
