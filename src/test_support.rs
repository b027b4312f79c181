//! Shared fakes for unit tests.

use std::sync::Mutex;

use crate::capture::ScreenCapture;
use crate::cipher::{BlockCipher, CipherFactory, CipherKey, BLOCK_SIZE};
use crate::codec::LossyCodec;
use crate::error::MiraError;
use crate::frame::{Area, PixelBuffer, BYTES_PER_PIXEL};
use crate::input::{InputInjector, KeyEvent, PointerEvent};

// ── Capture ──────────────────────────────────────────────────────

/// A capture backend serving a fixed in-memory screen.
pub struct FakeCapture {
    screen: Mutex<PixelBuffer>,
}

impl FakeCapture {
    /// A screen filled with one solid colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * BYTES_PER_PIXEL)
            .collect();
        Self {
            screen: Mutex::new(PixelBuffer::from_raw(width, height, data).unwrap()),
        }
    }

    /// Replace the screen contents, simulating on-screen change.
    pub fn set_screen(&self, screen: PixelBuffer) {
        *self.screen.lock().unwrap() = screen;
    }
}

impl ScreenCapture for FakeCapture {
    fn screen_size(&self) -> (u32, u32) {
        let screen = self.screen.lock().unwrap();
        (screen.width(), screen.height())
    }

    fn capture_region(&self, area: Area) -> Result<PixelBuffer, MiraError> {
        let screen = self.screen.lock().unwrap();
        if !area.fits_within(screen.width(), screen.height()) {
            return Err(MiraError::InvalidArea {
                area,
                screen_width: screen.width(),
                screen_height: screen.height(),
            });
        }
        let row_bytes = area.width as usize * BYTES_PER_PIXEL;
        let stride = screen.width() as usize * BYTES_PER_PIXEL;
        let mut data = Vec::with_capacity(area.height as usize * row_bytes);
        for row in 0..area.height as usize {
            let start = (area.y as usize + row) * stride + area.x as usize * BYTES_PER_PIXEL;
            data.extend_from_slice(&screen.data()[start..start + row_bytes]);
        }
        PixelBuffer::from_raw(area.width, area.height, data)
    }
}

/// Reports a screen size but fails every capture.
pub struct FailingCapture {
    width: u32,
    height: u32,
}

impl FailingCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ScreenCapture for FailingCapture {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture_region(&self, _area: Area) -> Result<PixelBuffer, MiraError> {
        Err(MiraError::Fatal("capture backend lost".into()))
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// A lossless stand-in for the lossy codec: an 8-byte dimension header
/// followed by the raw pixels. Quality is ignored.
pub struct RawCodec;

impl RawCodec {
    pub fn encode_buffer(&self, frame: &PixelBuffer) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + frame.data().len());
        out.extend_from_slice(&frame.width().to_le_bytes());
        out.extend_from_slice(&frame.height().to_le_bytes());
        out.extend_from_slice(frame.data());
        out
    }

    /// The pixel bytes of an encoded buffer, header stripped.
    pub fn payload(data: &[u8]) -> &[u8] {
        &data[8..]
    }
}

impl LossyCodec for RawCodec {
    fn encode(&self, frame: &PixelBuffer, _quality: f32) -> Result<Vec<u8>, MiraError> {
        Ok(self.encode_buffer(frame))
    }

    fn decode(&self, data: &[u8]) -> Result<PixelBuffer, MiraError> {
        if data.len() < 8 {
            return Err(MiraError::Codec("truncated raw frame".into()));
        }
        let width = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        PixelBuffer::from_raw(width, height, data[8..].to_vec())
    }
}

// ── Cipher ───────────────────────────────────────────────────────

/// A keyed XOR block cipher, its own inverse.
pub struct XorCipher {
    key: [u8; BLOCK_SIZE],
}

impl XorCipher {
    pub fn new(key: [u8; BLOCK_SIZE]) -> Self {
        Self { key }
    }
}

impl BlockCipher for XorCipher {
    fn encrypt_block(&self, mut block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        for (b, k) in block.iter_mut().zip(self.key) {
            *b ^= k;
        }
        block
    }

    fn decrypt_block(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
        self.encrypt_block(block)
    }
}

/// Derives an [`XorCipher`] from the leading session key bytes.
pub struct XorCipherFactory;

impl CipherFactory for XorCipherFactory {
    fn derive(&self, key: &CipherKey) -> Box<dyn BlockCipher> {
        let mut block_key = [0u8; BLOCK_SIZE];
        block_key.copy_from_slice(&key.as_bytes()[..BLOCK_SIZE]);
        Box::new(XorCipher::new(block_key))
    }
}

// ── Input ────────────────────────────────────────────────────────

/// Records injected events for assertions.
#[derive(Default)]
pub struct RecordingInjector {
    pointer: Mutex<Vec<PointerEvent>>,
    keys: Mutex<Vec<KeyEvent>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pointer_events(&self) -> Vec<PointerEvent> {
        self.pointer.lock().unwrap().clone()
    }

    pub fn key_events(&self) -> Vec<KeyEvent> {
        self.keys.lock().unwrap().clone()
    }
}

impl InputInjector for RecordingInjector {
    fn inject_pointer(&self, event: PointerEvent) -> Result<(), MiraError> {
        self.pointer.lock().unwrap().push(event);
        Ok(())
    }

    fn inject_key(&self, event: KeyEvent) -> Result<(), MiraError> {
        self.keys.lock().unwrap().push(event);
        Ok(())
    }
}
