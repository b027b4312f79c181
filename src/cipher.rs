//! Stream encryption over an externally supplied 8-byte block cipher.
//!
//! The block cipher itself is a capability consumed through the
//! [`BlockCipher`] trait; this module contributes the stream transform
//! and the session key derivation.
//!
//! # Tail handling
//!
//! Any trailing run shorter than one block passes through *unencrypted*.
//! This is an explicit, documented confidentiality weakening of the
//! buffer's tail, kept because the frame payload is lossy image data
//! whose final few bytes carry no recoverable structure on their own.

use serde::{Deserialize, Serialize};

/// Block size of the external cipher, in bytes.
pub const BLOCK_SIZE: usize = 8;

/// Context string for session key derivation. Changing it invalidates
/// every derived key.
const KEY_CONTEXT: &str = "mira-core 2026 session cipher v1";

// ── CipherKey ────────────────────────────────────────────────────

/// A derived symmetric session key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for CipherKey {
    // Never print key material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CipherKey(..)")
    }
}

/// Derive the session cipher key from the user's password.
///
/// Uses a real KDF (`blake3::derive_key`) and is independent of the
/// authentication nonce, so a captured handshake reveals nothing about
/// the stream key.
pub fn derive_session_key(password: &str) -> CipherKey {
    CipherKey(blake3::derive_key(KEY_CONTEXT, password.as_bytes()))
}

// ── BlockCipher / CipherFactory ──────────────────────────────────

/// An external symmetric block cipher operating on 8-byte blocks.
pub trait BlockCipher: Send + Sync {
    /// Encrypt one block.
    fn encrypt_block(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE];
    /// Decrypt one block.
    fn decrypt_block(&self, block: [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE];
}

/// Builds a [`BlockCipher`] instance from a derived session key.
pub trait CipherFactory: Send + Sync {
    fn derive(&self, key: &CipherKey) -> Box<dyn BlockCipher>;
}

// ── CipherTransport ──────────────────────────────────────────────

/// Wraps a block cipher into a whole-buffer stream transform.
pub struct CipherTransport {
    cipher: Box<dyn BlockCipher>,
}

impl CipherTransport {
    pub fn new(cipher: Box<dyn BlockCipher>) -> Self {
        Self { cipher }
    }

    /// Encrypt `data` block by block; the sub-block tail is copied
    /// through verbatim.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.transform(data, |c, b| c.encrypt_block(b))
    }

    /// Inverse of [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        self.transform(data, |c, b| c.decrypt_block(b))
    }

    fn transform(
        &self,
        data: &[u8],
        op: impl Fn(&dyn BlockCipher, [u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE],
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        let mut chunks = data.chunks_exact(BLOCK_SIZE);
        for chunk in &mut chunks {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            out.extend_from_slice(&op(self.cipher.as_ref(), block));
        }
        // Unencrypted tail.
        out.extend_from_slice(chunks.remainder());
        out
    }
}

// ── Tests ────────────────────────────────────────────────────────
