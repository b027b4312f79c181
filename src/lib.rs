//! mira-core: the session core of a remote-desktop streaming service.
//!
//! The crate covers both ends of a stream. On the machine being
//! mirrored, a [`StreamServer`] authenticates viewers with a
//! challenge/response handshake and serves each session through a
//! [`SessionController`], whose pipeline captures a screen region,
//! optionally expresses it as a delta against a shared reference frame,
//! compresses it with a lossy codec, and optionally encrypts it. On the
//! viewing side, a [`ClientReceiver`] runs the same pipeline in reverse
//! and composites frames into a screen canvas.
//!
//! Capture, input injection, the lossy codec, the block cipher, and the
//! settings store are all trait-injected capabilities; the crate ships
//! production implementations for the codec ([`JpegCodec`]) and the
//! settings store ([`JsonSettingsStore`]) and leaves the
//! platform-bound ones to the host process.

pub mod auth;
pub mod capture;
pub mod cipher;
pub mod codec;
pub mod delta;
pub mod error;
pub mod frame;
pub mod input;
pub mod net;
pub mod pipeline;
pub mod proto;
pub mod receiver;
pub mod session;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use auth::{AuthService, Session};
pub use capture::ScreenCapture;
pub use cipher::{derive_session_key, BlockCipher, CipherFactory, CipherKey, CipherTransport};
pub use codec::{JpegCodec, LossyCodec};
pub use delta::DeltaCodec;
pub use error::MiraError;
pub use frame::{Area, PixelBuffer};
pub use input::{InputInjector, KeyEvent, PointerEvent};
pub use net::{RemoteSession, StreamServer};
pub use pipeline::{CapturePipeline, EncodedFrame};
pub use receiver::{ClientReceiver, FrameSource, ReceiverControl, ReceiverDriver, RunState};
pub use session::{Capabilities, SessionController};
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsStore};
