//! Delta-frame codec: a frame expressed as a biased, halved difference
//! against a reference frame.
//!
//! Per pixel, per channel, only the 7 most-significant bits of each
//! 8-bit sample participate (the low bit is discarded for headroom):
//!
//! ```text
//! encode:  δ = ((cur & 0xFE) − (ref & 0xFE) + 256) >> 1
//! decode:  v = (δ << 1) − 256 + (ref & 0xFE), clipped to [0, 255]
//! ```
//!
//! A visually unchanged region encodes to the constant mid value 128,
//! which is what makes delta frames compress far better under a
//! block-based lossy codec than a literal difference image would.
//! Decode clips rather than errors: the delta frame usually passed
//! through lossy recompression on the way back, which can push
//! reconstructed values outside the valid range.

use crate::error::MiraError;
use crate::frame::PixelBuffer;

/// Bias added before halving so every encoded channel lands in 1..=255.
const BIAS: i32 = 256;

/// Mask selecting the 7 most-significant bits of a sample.
const HIGH_BITS: u8 = 0xFE;

// ── DeltaCodec ───────────────────────────────────────────────────

/// Stateless encoder/decoder for delta frames.
pub struct DeltaCodec;

impl DeltaCodec {
    /// Encode `current` as a delta against `reference`.
    ///
    /// Fails with [`MiraError::IncompatibleFrame`] if the dimensions
    /// differ.
    pub fn encode(
        reference: &PixelBuffer,
        current: &PixelBuffer,
    ) -> Result<PixelBuffer, MiraError> {
        Self::check_dimensions(reference, current)?;

        let out: Vec<u8> = reference
            .data()
            .iter()
            .zip(current.data())
            .map(|(&r, &c)| {
                let diff = (c & HIGH_BITS) as i32 - (r & HIGH_BITS) as i32;
                ((diff + BIAS) >> 1) as u8
            })
            .collect();

        PixelBuffer::from_raw(current.width(), current.height(), out)
    }

    /// Reconstruct a frame from `reference` and a delta frame.
    ///
    /// Out-of-range channels are clipped to [0, 255]; clipping, not an
    /// error, is the defined policy for values distorted by lossy
    /// recompression.
    pub fn decode(reference: &PixelBuffer, delta: &PixelBuffer) -> Result<PixelBuffer, MiraError> {
        Self::check_dimensions(reference, delta)?;

        let out: Vec<u8> = reference
            .data()
            .iter()
            .zip(delta.data())
            .map(|(&r, &d)| {
                let v = ((d as i32) << 1) - BIAS + (r & HIGH_BITS) as i32;
                v.clamp(0, 255) as u8
            })
            .collect();

        PixelBuffer::from_raw(delta.width(), delta.height(), out)
    }

    fn check_dimensions(reference: &PixelBuffer, other: &PixelBuffer) -> Result<(), MiraError> {
        if !reference.same_dimensions(other) {
            return Err(MiraError::IncompatibleFrame {
                expected_width: reference.width(),
                expected_height: reference.height(),
                width: other.width(),
                height: other.height(),
            });
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
