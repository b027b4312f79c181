//! Challenge/response authentication.
//!
//! The flow is the classic two-step: the client asks for a nonce, hashes
//! it together with the password, and submits the digest. Pending
//! challenges are keyed by requester identity so concurrent logins from
//! different peers cannot evict each other, each nonce is single-use,
//! and an unanswered challenge expires after [`AUTH_TIMEOUT`].
//!
//! Every failure surfaces as the opaque [`MiraError::Unauthorized`];
//! the concrete cause is logged at debug level only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::debug;

use crate::cipher::{derive_session_key, CipherKey};
use crate::error::MiraError;
use crate::settings::SettingsStore;

/// How long an issued challenge stays answerable.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(20);

/// Size of the challenge nonce in bytes.
pub const NONCE_LEN: usize = 16;

// ── Session ──────────────────────────────────────────────────────

/// The outcome of a successful login: who authenticated and the stream
/// parameters their session starts with.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub cipher_key: CipherKey,
    pub quality: f32,
    pub delta_enabled: bool,
    pub encryption_enabled: bool,
}

// ── AuthService ──────────────────────────────────────────────────

struct Challenge {
    nonce: [u8; NONCE_LEN],
    issued_at: Instant,
}

/// Issues challenges and verifies responses against the settings store.
pub struct AuthService {
    settings: Arc<dyn SettingsStore>,
    pending: Mutex<HashMap<String, Challenge>>,
    timeout: Duration,
}

impl AuthService {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self::with_timeout(settings, AUTH_TIMEOUT)
    }

    /// Custom challenge lifetime, for tests.
    pub fn with_timeout(settings: Arc<dyn SettingsStore>, timeout: Duration) -> Self {
        Self {
            settings,
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Issue a fresh nonce for `identity`, replacing any pending one.
    pub fn issue_challenge(&self, identity: &str) -> Result<[u8; NONCE_LEN], MiraError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut pending = self.lock_pending()?;
        pending.insert(
            identity.to_string(),
            Challenge {
                nonce,
                issued_at: Instant::now(),
            },
        );
        Ok(nonce)
    }

    /// Verify a challenge response and open a session.
    ///
    /// The pending challenge is consumed whether or not verification
    /// succeeds.
    pub fn authenticate(
        &self,
        identity: &str,
        username: &str,
        response: &[u8; 32],
    ) -> Result<Session, MiraError> {
        let challenge = {
            let mut pending = self.lock_pending()?;
            pending.remove(identity)
        };
        let challenge = match challenge {
            Some(c) => c,
            None => {
                debug!(identity, "login rejected: no pending challenge");
                return Err(MiraError::Unauthorized);
            }
        };

        if challenge.issued_at.elapsed() > self.timeout {
            debug!(identity, username, "login rejected: challenge expired");
            return Err(MiraError::Unauthorized);
        }

        let password = match self.settings.password(username) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(identity, username, "login rejected: unknown user");
                return Err(MiraError::Unauthorized);
            }
            Err(e) => {
                debug!(identity, username, error = %e, "login rejected: settings store failure");
                return Err(MiraError::Unauthorized);
            }
        };

        let expected = blake3::Hash::from(response_hash(&challenge.nonce, &password));
        // blake3::Hash compares in constant time.
        if expected != blake3::Hash::from(*response) {
            debug!(identity, username, "login rejected: bad response digest");
            return Err(MiraError::Unauthorized);
        }

        let quality = self.settings.quality(username).map_err(auth_store_err)?;
        let delta_enabled = self
            .settings
            .delta_enabled(username)
            .map_err(auth_store_err)?;
        let encryption_enabled = self
            .settings
            .encryption_enabled(username)
            .map_err(auth_store_err)?;

        debug!(identity, username, "login accepted");
        Ok(Session {
            username: username.to_string(),
            cipher_key: derive_session_key(&password),
            quality,
            delta_enabled,
            encryption_enabled,
        })
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Challenge>>, MiraError> {
        self.pending
            .lock()
            .map_err(|_| MiraError::Unauthorized)
    }
}

fn auth_store_err(e: MiraError) -> MiraError {
    debug!(error = %e, "settings store failure after verification");
    MiraError::Unauthorized
}

/// The digest a client submits: `blake3(nonce || password)`.
pub fn response_hash(nonce: &[u8; NONCE_LEN], password: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(nonce);
    hasher.update(password.as_bytes());
    *hasher.finalize().as_bytes()
}

// ── Tests ────────────────────────────────────────────────────────
