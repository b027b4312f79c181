//! Screen capture capability seam.
//!
//! The streaming core never talks to a real display itself; the host
//! process injects whatever capture backend it has. A capture failure
//! is unrecoverable for the session that hits it.

use crate::error::MiraError;
use crate::frame::{Area, PixelBuffer};

/// Provides pixel data for the machine being mirrored.
pub trait ScreenCapture: Send + Sync {
    /// Full screen dimensions in pixels, `(width, height)`.
    fn screen_size(&self) -> (u32, u32);

    /// Capture the given region as a tightly packed RGB8 buffer.
    ///
    /// The returned buffer must be exactly `area.width` by
    /// `area.height`; failure here poisons the owning pipeline.
    fn capture_region(&self, area: Area) -> Result<PixelBuffer, MiraError>;
}
