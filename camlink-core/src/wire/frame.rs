//! Streaming frame codec.
//!
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ length (u32) │ payload (length B)   │
//! │  big-endian  │                      │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! A zero length is valid and carries an empty payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CamlinkError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame the decoder accepts by default (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode the prefix for a payload of `len` bytes.
pub fn length_prefix(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE], CamlinkError> {
    let len = u32::try_from(len).map_err(|_| CamlinkError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_be_bytes())
}

// ── FrameCodec ───────────────────────────────────────────────────

/// `tokio_util` codec for the streaming protocol.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = CamlinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_size {
            return Err(CamlinkError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = CamlinkError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(CamlinkError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_slice(&length_prefix(item.len())?);
        dst.put_slice(&item);
        Ok(())
    }
}
