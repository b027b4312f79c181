//! Lossy still-image codec boundary.
//!
//! The pipeline compresses every outgoing frame (literal or delta)
//! through a [`LossyCodec`]. The codec is a seam so tests can swap in a
//! cheap fake; production uses [`JpegCodec`].

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use crate::error::MiraError;
use crate::frame::PixelBuffer;

// ── LossyCodec ───────────────────────────────────────────────────

/// Compresses and decompresses RGB8 frames with loss.
pub trait LossyCodec: Send + Sync {
    /// Compress `frame` at `quality` in `[0.0, 1.0]` (higher is better).
    fn encode(&self, frame: &PixelBuffer, quality: f32) -> Result<Vec<u8>, MiraError>;

    /// Decompress a previously encoded frame.
    fn decode(&self, data: &[u8]) -> Result<PixelBuffer, MiraError>;
}

// ── JpegCodec ────────────────────────────────────────────────────

/// JPEG implementation of the lossy codec.
pub struct JpegCodec;

impl JpegCodec {
    /// Map the abstract `[0.0, 1.0]` quality onto JPEG's 1..=100 scale.
    fn jpeg_quality(quality: f32) -> u8 {
        let q = (quality.clamp(0.0, 1.0) * 100.0).round() as u8;
        q.max(1)
    }
}

impl LossyCodec for JpegCodec {
    fn encode(&self, frame: &PixelBuffer, quality: f32) -> Result<Vec<u8>, MiraError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, Self::jpeg_quality(quality))
            .encode(
                frame.data(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| MiraError::Codec(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<PixelBuffer, MiraError> {
        let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|e| MiraError::Codec(e.to_string()))?
            .to_rgb8();
        let (width, height) = (img.width(), img.height());
        PixelBuffer::from_raw(width, height, img.into_raw())
    }
}

// ── Tests ────────────────────────────────────────────────────────
