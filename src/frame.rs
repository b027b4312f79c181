//! Value types for the streamed screen rectangle and its pixel data.
//!
//! A [`PixelBuffer`] is produced once by the capture capability, handed
//! off by move, and never mutated afterwards. Reference frames are plain
//! `PixelBuffer`s that get replaced wholesale, so concurrent readers can
//! never observe a torn buffer.

use serde::{Deserialize, Serialize};

use crate::error::MiraError;

/// Bytes per RGB8 sample.
pub const BYTES_PER_PIXEL: usize = 3;

// ── Area ─────────────────────────────────────────────────────────

/// The screen rectangle currently being streamed.
///
/// Changing the area invalidates the reference frame on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Area {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The full-screen area for the given screen dimensions.
    pub fn full_screen(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Number of pixels covered by this area.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether this area lies entirely within a screen of the given size.
    ///
    /// Zero-sized areas are rejected; overflow-safe.
    pub fn fits_within(&self, screen_width: u32, screen_height: u32) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let right = match self.x.checked_add(self.width) {
            Some(r) => r,
            None => return false,
        };
        let bottom = match self.y.checked_add(self.height) {
            Some(b) => b,
            None => return false,
        };
        right <= screen_width && bottom <= screen_height
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// A fixed-size grid of opaque RGB samples, 8 bits per channel,
/// tightly packed (`width * height * 3` bytes, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// The uniform baseline: an all-black buffer of the given size.
    ///
    /// Used as the reference frame whenever the area changes or a
    /// delta/encryption toggle invalidates the previous reference.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    /// Wrap raw RGB8 bytes. Fails if the length does not match the
    /// dimensions.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MiraError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(MiraError::Codec(format!(
                "pixel buffer length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Buffer height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB8 bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the raw bytes.
    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Whether `other` has the same dimensions.
    pub fn same_dimensions(&self, other: &PixelBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// The RGB sample at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    /// Copy `src` into this buffer with its top-left corner at `(x, y)`,
    /// replacing exactly that sub-rectangle.
    pub fn blit(&mut self, src: &PixelBuffer, x: u32, y: u32) -> Result<(), MiraError> {
        let target = Area::new(x, y, src.width, src.height);
        if !target.fits_within(self.width, self.height) {
            return Err(MiraError::InvalidArea {
                area: target,
                screen_width: self.width,
                screen_height: self.height,
            });
        }

        let src_row_bytes = src.width as usize * BYTES_PER_PIXEL;
        let dst_stride = self.width as usize * BYTES_PER_PIXEL;
        for row in 0..src.height as usize {
            let src_start = row * src_row_bytes;
            let dst_start = (y as usize + row) * dst_stride + x as usize * BYTES_PER_PIXEL;
            self.data[dst_start..dst_start + src_row_bytes]
                .copy_from_slice(&src.data[src_start..src_start + src_row_bytes]);
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
