//! Length-prefixed framing.
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ length: u32 (BE, 4)  │ payload: [u8; length]    │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! A zero length is legal and carries an empty payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CamError;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single payload (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Most buffer space reserved ahead of bytes actually arriving.
const RESERVE_STEP: usize = 64 * 1024;

/// Codec for `[u32 big-endian length][payload]` messages.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = CamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let length = u32::from_be_bytes(header) as usize;

        if length > self.max_frame_len {
            return Err(CamError::FrameTooLarge {
                size: length,
                max: self.max_frame_len,
            });
        }

        if src.len() < HEADER_LEN + length {
            // Grow with the data, not with what the header claims.
            let missing = HEADER_LEN + length - src.len();
            src.reserve(missing.min(RESERVE_STEP));
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length)))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = CamError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_len {
            return Err(CamError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_len,
            });
        }

        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(item);
        Ok(())
    }
}
