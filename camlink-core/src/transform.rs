//! Frame orientation and re-encoding.
//!
//! Sensors deliver landscape frames. Every frame is rotated 90° clockwise;
//! frames from the front camera are additionally mirrored vertically so
//! the collector sees what the user sees.

use bytes::Bytes;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use crate::device::{Facing, Frame};
use crate::error::CamlinkError;

/// Default JPEG quality for re-encoded frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Rotate (and for `Front`, mirror) a decoded image.
pub fn orient(img: DynamicImage, facing: Facing) -> DynamicImage {
    let rotated = img.rotate90();
    match facing {
        Facing::Front => rotated.flipv(),
        Facing::Back => rotated,
    }
}

/// Stateless decode → orient → encode step.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
    quality: u8,
}

impl FrameTransform {
    /// `quality` is clamped to `1..=100`.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Transform `frame`, passing the original bytes through unchanged when
    /// they cannot be decoded or the result cannot be encoded.
    pub fn apply(&self, frame: Frame) -> Frame {
        match self.try_apply(&frame) {
            Ok(payload) => Frame { payload, ..frame },
            Err(e) => {
                debug!(facing = %frame.facing, error = %e, "frame transform skipped");
                frame
            }
        }
    }

    /// Transform `frame`, reporting decode/encode failures.
    pub fn try_apply(&self, frame: &Frame) -> Result<Bytes, CamlinkError> {
        let img = image::load_from_memory(&frame.payload)?;
        let oriented = orient(img, frame.facing).to_rgb8();

        let mut out = Vec::with_capacity(frame.payload.len());
        JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&oriented)?;
        Ok(Bytes::from(out))
    }
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}
