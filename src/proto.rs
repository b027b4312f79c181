//! Wire protocol: typed request/response messages and their framing.
//!
//! Every message travels as `magic | payload length | checksum |
//! bincode payload`. The checksum is the first four bytes of the
//! payload's blake3 digest and guards against framing bugs and
//! corruption, not tampering.

use bincode::Options as _;
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::MiraError;
use crate::frame::Area;
use crate::input::{KeyEvent, PointerEvent};
use crate::pipeline::EncodedFrame;

/// Frame magic, also a cheap protocol version gate.
pub const MAGIC: [u8; 4] = *b"MRP1";

/// Upper bound on one message payload. An uncompressed 4K RGB frame is
/// ~24 MiB; anything past double that is a framing error.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 12;

// ── Messages ─────────────────────────────────────────────────────

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    // Pre-authentication.
    IssueChallenge,
    Authenticate { username: String, response: [u8; 32] },

    // Frame cycle.
    PrepareFrame,
    GetFrame,
    RestoreFrame,

    // Area.
    Reset,
    SetArea(Area),
    ScreenSize,

    // Stream parameters.
    GetQuality,
    SetQuality(f32),
    GetDelta,
    SetDelta(bool),
    GetEncryption,
    SetEncryption(bool),

    // Input.
    Pointer(PointerEvent),
    Key(KeyEvent),

    Logout,
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Challenge([u8; 16]),
    Authenticated,
    Ack,
    Area(Area),
    ScreenSize { width: u32, height: u32 },
    Frame(EncodedFrame),
    Quality(f32),
    Flag(bool),
    Error(WireError),
}

/// Errors that cross the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    Unauthorized,
    IncompatibleFrame,
    InvalidArea,
    NoFrame,
    SessionClosed,
    Fatal(String),
    Invalid(String),
}

impl From<&MiraError> for WireError {
    fn from(e: &MiraError) -> Self {
        match e {
            MiraError::Unauthorized => WireError::Unauthorized,
            MiraError::IncompatibleFrame { .. } => WireError::IncompatibleFrame,
            MiraError::InvalidArea { .. } => WireError::InvalidArea,
            MiraError::NoFrame => WireError::NoFrame,
            MiraError::SessionClosed => WireError::SessionClosed,
            MiraError::Fatal(msg) => WireError::Fatal(msg.clone()),
            other => WireError::Invalid(other.to_string()),
        }
    }
}

impl From<WireError> for MiraError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Unauthorized => MiraError::Unauthorized,
            WireError::IncompatibleFrame => {
                MiraError::ProtocolViolation("peer rejected frame dimensions")
            }
            WireError::InvalidArea => MiraError::ProtocolViolation("peer rejected area"),
            WireError::NoFrame => MiraError::NoFrame,
            WireError::SessionClosed => MiraError::SessionClosed,
            WireError::Fatal(msg) => MiraError::Fatal(msg),
            WireError::Invalid(msg) => MiraError::Encoding(msg),
        }
    }
}

// ── WireCodec ────────────────────────────────────────────────────

/// Framed codec sending `Tx` and receiving `Rx`.
pub struct WireCodec<Tx, Rx> {
    _marker: std::marker::PhantomData<fn() -> (Tx, Rx)>,
}

/// The codec a client holds.
pub type ClientCodec = WireCodec<Request, Response>;
/// The codec a server connection holds.
pub type ServerCodec = WireCodec<Response, Request>;

impl<Tx, Rx> WireCodec<Tx, Rx> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<Tx, Rx> Default for WireCodec<Tx, Rx> {
    fn default() -> Self {
        Self::new()
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = blake3::hash(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

fn wire_options() -> impl bincode::Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE as u64)
        .with_little_endian()
        .with_varint_encoding()
}

impl<Tx: Serialize, Rx> Encoder<Tx> for WireCodec<Tx, Rx> {
    type Error = MiraError;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), MiraError> {
        let payload = wire_options()
            .serialize(&item)
            .map_err(|e| MiraError::Encoding(e.to_string()))?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(MiraError::Encoding(format!(
                "message of {} bytes exceeds frame limit",
                payload.len()
            )));
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&checksum(&payload));
        dst.put_slice(&payload);
        Ok(())
    }
}

impl<Tx, Rx: DeserializeOwned> Decoder for WireCodec<Tx, Rx> {
    type Item = Rx;
    type Error = MiraError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Rx>, MiraError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(MiraError::ProtocolViolation("bad frame magic"));
        }
        let len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(MiraError::ProtocolViolation("frame exceeds size limit"));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let expected = [src[8], src[9], src[10], src[11]];
        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        if checksum(&payload) != expected {
            return Err(MiraError::ProtocolViolation("frame checksum mismatch"));
        }

        let item = wire_options()
            .deserialize(&payload)
            .map_err(|e| MiraError::Encoding(e.to_string()))?;
        Ok(Some(item))
    }
}

// ── Tests ────────────────────────────────────────────────────────
