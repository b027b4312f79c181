//! Per-user persisted settings.
//!
//! The store is an injected capability: the auth service reads
//! credentials from it and the session controller writes stream
//! parameter changes back through it. Keys are flat strings scoped by
//! user name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::error::MiraError;

/// Key for the per-user password.
pub const KEY_PASSWORD: &str = "password";
/// Key for the stream quality, stored as a decimal in `[0.0, 1.0]`.
pub const KEY_QUALITY: &str = "quality";
/// Key for the delta-frames flag.
pub const KEY_DELTA: &str = "delta";
/// Key for the encryption flag.
pub const KEY_ENCRYPTION: &str = "encryption";

/// Default stream quality for a new user.
pub const DEFAULT_QUALITY: f32 = 0.6;

// ── SettingsStore ────────────────────────────────────────────────

/// String-keyed settings, persisted per user.
pub trait SettingsStore: Send + Sync {
    /// Read one value; `Ok(None)` if the key was never set.
    fn get(&self, user: &str, key: &str) -> Result<Option<String>, MiraError>;

    /// Write one value, persisting immediately.
    fn set(&self, user: &str, key: &str, value: &str) -> Result<(), MiraError>;
}

impl dyn SettingsStore {
    /// The user's password, if the user exists.
    pub fn password(&self, user: &str) -> Result<Option<String>, MiraError> {
        self.get(user, KEY_PASSWORD)
    }

    /// The user's stream quality, falling back to the default on a
    /// missing or malformed value.
    pub fn quality(&self, user: &str) -> Result<f32, MiraError> {
        Ok(self
            .get(user, KEY_QUALITY)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_QUALITY))
    }

    /// Whether delta frames are enabled for the user.
    pub fn delta_enabled(&self, user: &str) -> Result<bool, MiraError> {
        self.flag(user, KEY_DELTA)
    }

    /// Whether stream encryption is enabled for the user.
    pub fn encryption_enabled(&self, user: &str) -> Result<bool, MiraError> {
        self.flag(user, KEY_ENCRYPTION)
    }

    /// Create a user with the default stream parameters.
    pub fn add_user(&self, user: &str, password: &str) -> Result<(), MiraError> {
        self.set(user, KEY_PASSWORD, password)?;
        self.set(user, KEY_QUALITY, &DEFAULT_QUALITY.to_string())?;
        self.set(user, KEY_DELTA, "false")?;
        self.set(user, KEY_ENCRYPTION, "false")?;
        Ok(())
    }

    fn flag(&self, user: &str, key: &str) -> Result<bool, MiraError> {
        Ok(self
            .get(user, key)?
            .map(|v| v == "true")
            .unwrap_or(false))
    }
}

// ── JsonSettingsStore ────────────────────────────────────────────

/// Settings persisted to a single JSON file, rewritten on every set.
pub struct JsonSettingsStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonSettingsStore {
    /// Open the store at `path`, loading existing entries if the file
    /// exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MiraError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(MiraError::Settings(e.to_string())),
        };
        debug!(path = %path.display(), entries = entries.len(), "settings loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn scoped(user: &str, key: &str) -> String {
        format!("{user}.{key}")
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), MiraError> {
        let raw = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, raw).map_err(|e| MiraError::Settings(e.to_string()))
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, user: &str, key: &str) -> Result<Option<String>, MiraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| MiraError::Settings("settings lock poisoned".into()))?;
        Ok(entries.get(&Self::scoped(user, key)).cloned())
    }

    fn set(&self, user: &str, key: &str, value: &str) -> Result<(), MiraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| MiraError::Settings("settings lock poisoned".into()))?;
        entries.insert(Self::scoped(user, key), value.to_string());
        self.persist(&entries)
    }
}

// ── MemorySettingsStore ──────────────────────────────────────────

/// Volatile in-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemorySettingsStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, user: &str, key: &str) -> Result<Option<String>, MiraError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| MiraError::Settings("settings lock poisoned".into()))?;
        Ok(entries.get(&JsonSettingsStore::scoped(user, key)).cloned())
    }

    fn set(&self, user: &str, key: &str, value: &str) -> Result<(), MiraError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| MiraError::Settings("settings lock poisoned".into()))?;
        entries.insert(JsonSettingsStore::scoped(user, key), value.to_string());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
