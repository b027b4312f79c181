//! Domain-specific error types for the mira streaming core.
//!
//! All fallible operations return `Result<T, MiraError>`.
//! Authorization failures are deliberately opaque: every cause collapses
//! into [`MiraError::Unauthorized`] so a caller cannot probe which check
//! rejected it. The concrete cause is logged server-side instead.

use thiserror::Error;

use crate::frame::Area;

/// The canonical error type for the mira streaming core.
#[derive(Debug, Error)]
pub enum MiraError {
    // ── Authentication ───────────────────────────────────────────
    /// Opaque authentication failure. Covers bad credentials, a
    /// foreign, stale, expired, or missing challenge, and settings
    /// store failures during login — indistinguishably.
    #[error("authorization failed")]
    Unauthorized,

    // ── Frame errors ─────────────────────────────────────────────
    /// Delta encode/decode was attempted across mismatched dimensions.
    #[error("incompatible frame: expected {expected_width}x{expected_height}, got {width}x{height}")]
    IncompatibleFrame {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// A requested area does not fit within the screen bounds.
    #[error("area {area:?} out of bounds for {screen_width}x{screen_height} screen")]
    InvalidArea {
        area: Area,
        screen_width: u32,
        screen_height: u32,
    },

    /// `get_frame` was called before any frame had been prepared.
    #[error("no prepared frame available")]
    NoFrame,

    /// A frame arrived out of order (duplicate or regression).
    #[error("frame order violation: expected sequence > {last}, got {actual}")]
    FrameOrder { last: u64, actual: u64 },

    // ── Session errors ───────────────────────────────────────────
    /// Operation on a session that has already been logged out.
    #[error("session closed")]
    SessionClosed,

    /// Unrecoverable session failure: capture/injection capability
    /// lost or the encoder failed. Tears the session down.
    #[error("fatal session error: {0}")]
    Fatal(String),

    // ── Transport errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("transport failure: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Serialization / codec errors ─────────────────────────────
    /// Wire encoding or decoding of a message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The lossy image codec rejected its input.
    #[error("codec error: {0}")]
    Codec(String),

    /// The settings store could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),
}

impl MiraError {
    /// Whether this error is a per-frame transport problem that the
    /// streaming loop may tolerate by skipping the frame.
    pub fn is_transport(&self) -> bool {
        matches!(self, MiraError::Connection(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MiraError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MiraError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for MiraError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        MiraError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for MiraError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        MiraError::Encoding(e.to_string())
    }
}

impl From<serde_json::Error> for MiraError {
    fn from(e: serde_json::Error) -> Self {
        MiraError::Settings(e.to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────
