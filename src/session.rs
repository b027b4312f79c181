//! Per-session operation surface.
//!
//! A [`SessionController`] is created after a successful login and owns
//! the session's pipeline worker. Every operation checks the session is
//! still open; after `logout` everything fails with
//! [`MiraError::SessionClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::Session;
use crate::capture::ScreenCapture;
use crate::cipher::CipherFactory;
use crate::codec::LossyCodec;
use crate::error::MiraError;
use crate::frame::Area;
use crate::input::{InputInjector, KeyEvent, PointerEvent};
use crate::pipeline::{CapturePipeline, EncodedFrame};
use crate::settings::{SettingsStore, KEY_DELTA, KEY_ENCRYPTION, KEY_QUALITY};

// ── Capabilities ─────────────────────────────────────────────────

/// The host-provided capabilities a session is built from.
#[derive(Clone)]
pub struct Capabilities {
    pub capture: Arc<dyn ScreenCapture>,
    pub injector: Arc<dyn InputInjector>,
    pub codec: Arc<dyn LossyCodec>,
    pub cipher: Arc<dyn CipherFactory>,
    pub settings: Arc<dyn SettingsStore>,
}

// ── SessionController ────────────────────────────────────────────

/// Drives one authenticated session.
pub struct SessionController {
    username: String,
    pipeline: CapturePipeline,
    injector: Arc<dyn InputInjector>,
    settings: Arc<dyn SettingsStore>,
    closed: AtomicBool,
}

impl SessionController {
    /// Spawn the session's pipeline with the stream parameters loaded
    /// at login.
    pub fn start(session: Session, caps: &Capabilities) -> Self {
        info!(username = %session.username, "session started");
        let pipeline = CapturePipeline::spawn(
            caps.capture.clone(),
            caps.codec.clone(),
            caps.cipher.clone(),
            session.cipher_key,
            session.quality,
            session.delta_enabled,
            session.encryption_enabled,
        );
        Self {
            username: session.username,
            pipeline,
            injector: caps.injector.clone(),
            settings: caps.settings.clone(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    // ── Frame cycle ──────────────────────────────────────────────

    pub async fn prepare_frame(&self) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.prepare().await
    }

    pub async fn get_frame(&self) -> Result<EncodedFrame, MiraError> {
        self.check_open()?;
        self.pipeline.deliver().await
    }

    pub async fn restore_frame(&self) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.restore().await
    }

    // ── Area ─────────────────────────────────────────────────────

    pub async fn reset(&self) -> Result<Area, MiraError> {
        self.check_open()?;
        self.pipeline.reset().await
    }

    pub async fn set_area(&self, area: Area) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.set_area(area).await
    }

    pub async fn screen_size(&self) -> Result<(u32, u32), MiraError> {
        self.check_open()?;
        self.pipeline.screen_size().await
    }

    // ── Stream parameters ────────────────────────────────────────

    pub async fn set_quality(&self, quality: f32) -> Result<(), MiraError> {
        self.check_open()?;
        let quality = quality.clamp(0.0, 1.0);
        self.pipeline.set_quality(quality).await?;
        self.persist(KEY_QUALITY, quality.to_string()).await;
        Ok(())
    }

    pub async fn quality(&self) -> Result<f32, MiraError> {
        self.check_open()?;
        self.pipeline.quality().await
    }

    pub async fn set_delta_enabled(&self, enabled: bool) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.set_delta(enabled).await?;
        self.persist(KEY_DELTA, enabled.to_string()).await;
        Ok(())
    }

    pub async fn delta_enabled(&self) -> Result<bool, MiraError> {
        self.check_open()?;
        self.pipeline.delta_enabled().await
    }

    pub async fn set_encryption_enabled(&self, enabled: bool) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.set_encryption(enabled).await?;
        self.persist(KEY_ENCRYPTION, enabled.to_string()).await;
        Ok(())
    }

    pub async fn encryption_enabled(&self) -> Result<bool, MiraError> {
        self.check_open()?;
        self.pipeline.encryption_enabled().await
    }

    // ── Input ────────────────────────────────────────────────────

    pub fn pointer_event(&self, event: PointerEvent) -> Result<(), MiraError> {
        self.check_open()?;
        self.injector.inject_pointer(event)
    }

    pub fn key_event(&self, event: KeyEvent) -> Result<(), MiraError> {
        self.check_open()?;
        self.injector.inject_key(event)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub async fn pause(&self) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.pause().await
    }

    pub async fn resume(&self) -> Result<(), MiraError> {
        self.check_open()?;
        self.pipeline.resume().await
    }

    /// Close the session and stop its pipeline worker.
    pub async fn logout(&self) -> Result<(), MiraError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MiraError::SessionClosed);
        }
        info!(username = %self.username, "session closed");
        self.pipeline.shutdown().await
    }

    fn check_open(&self) -> Result<(), MiraError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MiraError::SessionClosed);
        }
        Ok(())
    }

    /// Persist a parameter change. The store may hit the filesystem,
    /// so the write runs on the blocking pool. A store failure keeps
    /// the live session running and is only logged.
    async fn persist(&self, key: &'static str, value: String) {
        let settings = self.settings.clone();
        let username = self.username.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            settings.set(&username, key, &value)
        })
        .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(username = %self.username, key, error = %e, "failed to persist setting");
            }
            Err(e) => {
                warn!(username = %self.username, key, error = %e, "settings write task failed");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::cipher::derive_session_key;
    use crate::input::PointerButton;
    use crate::settings::MemorySettingsStore;
    use crate::test_support::{FakeCapture, RawCodec, RecordingInjector, XorCipherFactory};

    fn controller() -> (SessionController, Arc<RecordingInjector>, Arc<dyn SettingsStore>) {
        let injector = Arc::new(RecordingInjector::new());
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        settings.add_user("alice", "pw").unwrap();
        let caps = Capabilities {
            capture: Arc::new(FakeCapture::solid(32, 32, [3, 3, 3])),
            injector: injector.clone(),
            codec: Arc::new(RawCodec),
            cipher: Arc::new(XorCipherFactory),
            settings: settings.clone(),
        };
        let session = Session {
            username: "alice".into(),
            cipher_key: derive_session_key("pw"),
            quality: 0.6,
            delta_enabled: false,
            encryption_enabled: false,
        };
        (SessionController::start(session, &caps), injector, settings)
    }

    #[tokio::test]
    async fn frame_cycle_works_end_to_end() {
        let (ctl, _, _) = controller();
        ctl.prepare_frame().await.unwrap();
        let frame = ctl.get_frame().await.unwrap();
        assert_eq!(frame.sequence, 1);
        ctl.restore_frame().await.unwrap();
    }

    #[tokio::test]
    async fn parameter_changes_persist_to_settings() {
        let (ctl, _, settings) = controller();
        ctl.set_quality(0.9).await.unwrap();
        ctl.set_delta_enabled(true).await.unwrap();
        assert_eq!(settings.quality("alice").unwrap(), 0.9);
        assert!(settings.delta_enabled("alice").unwrap());
    }

    struct BrokenSettings;

    impl SettingsStore for BrokenSettings {
        fn get(&self, _user: &str, _key: &str) -> Result<Option<String>, MiraError> {
            Ok(None)
        }

        fn set(&self, _user: &str, _key: &str, _value: &str) -> Result<(), MiraError> {
            Err(MiraError::Settings("disk full".into()))
        }
    }

    #[tokio::test]
    async fn persist_failure_keeps_the_session_running() {
        let caps = Capabilities {
            capture: Arc::new(FakeCapture::solid(16, 16, [1, 1, 1])),
            injector: Arc::new(RecordingInjector::new()),
            codec: Arc::new(RawCodec),
            cipher: Arc::new(XorCipherFactory),
            settings: Arc::new(BrokenSettings),
        };
        let session = Session {
            username: "alice".into(),
            cipher_key: derive_session_key("pw"),
            quality: 0.6,
            delta_enabled: false,
            encryption_enabled: false,
        };
        let ctl = SessionController::start(session, &caps);

        // The parameter change succeeds live even though it could not
        // be persisted.
        ctl.set_quality(0.9).await.unwrap();
        assert_eq!(ctl.quality().await.unwrap(), 0.9);
        ctl.prepare_frame().await.unwrap();
        ctl.get_frame().await.unwrap();
    }

    #[tokio::test]
    async fn input_events_reach_the_injector() {
        let (ctl, injector, _) = controller();
        ctl.pointer_event(PointerEvent::pressed(5, 6, PointerButton::Left))
            .unwrap();
        ctl.key_event(KeyEvent::pressed(42)).unwrap();
        assert_eq!(injector.pointer_events().len(), 1);
        assert_eq!(injector.key_events().len(), 1);
    }

    #[tokio::test]
    async fn logout_closes_every_operation() {
        let (ctl, _, _) = controller();
        ctl.logout().await.unwrap();
        assert!(matches!(
            ctl.prepare_frame().await,
            Err(MiraError::SessionClosed)
        ));
        assert!(matches!(
            ctl.pointer_event(PointerEvent::moved(0, 0)),
            Err(MiraError::SessionClosed)
        ));
        // Double logout is itself an error.
        assert!(matches!(ctl.logout().await, Err(MiraError::SessionClosed)));
    }
}
