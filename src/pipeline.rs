//! The capture pipeline actor.
//!
//! One worker task per session owns the capture capability, the
//! reference frame, and the staged outgoing frame. Commands arrive on a
//! bounded mpsc channel and are processed strictly in order, which is
//! what enforces the one-cycle-at-a-time contract: a pause request
//! enqueued behind a running cycle is only acknowledged once that cycle
//! has finished, so acknowledgement implies quiescence.
//!
//! `prepare` is deliberately fire-and-forget. The caller's next
//! `deliver` naturally lines up behind the capture cycle, so capture and
//! encoding overlap with the caller's network round-trip, the same
//! double-buffering the two-phase prepare/get contract exists for.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::capture::ScreenCapture;
use crate::cipher::{CipherFactory, CipherKey, CipherTransport};
use crate::codec::LossyCodec;
use crate::delta::DeltaCodec;
use crate::error::MiraError;
use crate::frame::{Area, PixelBuffer};

const COMMAND_BUFFER: usize = 32;

// ── EncodedFrame ─────────────────────────────────────────────────

/// One encoded frame as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFrame {
    /// Strictly increasing per session, starting at 1.
    pub sequence: u64,
    /// Width of the encoded region in pixels.
    pub width: u32,
    /// Height of the encoded region in pixels.
    pub height: u32,
    /// Whether the payload is a delta against the reference frame.
    pub delta: bool,
    /// Whether the payload is encrypted.
    pub encrypted: bool,
    /// Codec output, possibly encrypted.
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// ── Commands ─────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, MiraError>>;

enum Command {
    Prepare,
    Deliver(Reply<EncodedFrame>),
    Restore(Reply<()>),
    Reset(Reply<Area>),
    SetArea(Area, Reply<()>),
    ScreenSize(Reply<(u32, u32)>),
    SetQuality(f32, Reply<()>),
    GetQuality(Reply<f32>),
    SetDelta(bool, Reply<()>),
    GetDelta(Reply<bool>),
    SetEncryption(bool, Reply<()>),
    GetEncryption(Reply<bool>),
    Pause(Reply<()>),
    Resume,
    Shutdown(Reply<()>),
}

// ── CapturePipeline handle ───────────────────────────────────────

/// Cloneable handle to a running pipeline worker.
#[derive(Clone)]
pub struct CapturePipeline {
    tx: mpsc::Sender<Command>,
}

impl CapturePipeline {
    /// Spawn the worker task for a fresh session.
    ///
    /// The streamed area starts at full screen with a black reference.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        capture: Arc<dyn ScreenCapture>,
        codec: Arc<dyn LossyCodec>,
        cipher_factory: Arc<dyn CipherFactory>,
        cipher_key: CipherKey,
        quality: f32,
        delta_enabled: bool,
        encryption_enabled: bool,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (width, height) = capture.screen_size();
        let area = Area::full_screen(width, height);

        let cipher = encryption_enabled.then(|| CipherTransport::new(cipher_factory.derive(&cipher_key)));
        let worker = Worker {
            capture,
            codec,
            cipher_factory,
            cipher_key,
            cipher,
            reference: PixelBuffer::black(area.width, area.height),
            area,
            quality,
            delta_enabled,
            encryption_enabled,
            pending: None,
            sequence: 0,
            paused: false,
            deferred_prepare: false,
            fatal: None,
        };
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    /// Kick off the next capture cycle. Returns as soon as the command
    /// is enqueued.
    pub async fn prepare(&self) -> Result<(), MiraError> {
        self.tx.send(Command::Prepare).await?;
        Ok(())
    }

    /// Fetch the staged frame. Each prepared frame is served once;
    /// asking again before the next prepare yields `NoFrame`.
    pub async fn deliver(&self) -> Result<EncodedFrame, MiraError> {
        self.call(Command::Deliver).await
    }

    /// Install the staged frame as the new reference. Idempotent.
    pub async fn restore(&self) -> Result<(), MiraError> {
        self.call(Command::Restore).await
    }

    /// Reset to the full-screen area with a black reference.
    pub async fn reset(&self) -> Result<Area, MiraError> {
        self.call(Command::Reset).await
    }

    /// Change the streamed area, invalidating the reference.
    pub async fn set_area(&self, area: Area) -> Result<(), MiraError> {
        self.call(|r| Command::SetArea(area, r)).await
    }

    /// Screen dimensions as reported by the capture capability.
    pub async fn screen_size(&self) -> Result<(u32, u32), MiraError> {
        self.call(Command::ScreenSize).await
    }

    pub async fn set_quality(&self, quality: f32) -> Result<(), MiraError> {
        self.call(|r| Command::SetQuality(quality, r)).await
    }

    pub async fn quality(&self) -> Result<f32, MiraError> {
        self.call(Command::GetQuality).await
    }

    pub async fn set_delta(&self, enabled: bool) -> Result<(), MiraError> {
        self.call(|r| Command::SetDelta(enabled, r)).await
    }

    pub async fn delta_enabled(&self) -> Result<bool, MiraError> {
        self.call(Command::GetDelta).await
    }

    pub async fn set_encryption(&self, enabled: bool) -> Result<(), MiraError> {
        self.call(|r| Command::SetEncryption(enabled, r)).await
    }

    pub async fn encryption_enabled(&self) -> Result<bool, MiraError> {
        self.call(Command::GetEncryption).await
    }

    /// Pause capture. The acknowledgement arrives only after any
    /// in-flight cycle has completed.
    pub async fn pause(&self) -> Result<(), MiraError> {
        self.call(Command::Pause).await
    }

    /// Resume capture, running a deferred cycle if one was requested
    /// while paused.
    pub async fn resume(&self) -> Result<(), MiraError> {
        self.tx.send(Command::Resume).await?;
        Ok(())
    }

    /// Stop the worker task.
    pub async fn shutdown(&self) -> Result<(), MiraError> {
        self.call(Command::Shutdown).await
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, MiraError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await?;
        reply_rx.await?
    }
}

// ── Worker ───────────────────────────────────────────────────────

struct PendingFrame {
    frame: EncodedFrame,
    /// Codec output before encryption, kept for reference restoration.
    plain: Vec<u8>,
    restored: bool,
    delivered: bool,
}

struct Worker {
    capture: Arc<dyn ScreenCapture>,
    codec: Arc<dyn LossyCodec>,
    cipher_factory: Arc<dyn CipherFactory>,
    cipher_key: CipherKey,
    cipher: Option<CipherTransport>,
    reference: PixelBuffer,
    area: Area,
    quality: f32,
    delta_enabled: bool,
    encryption_enabled: bool,
    pending: Option<PendingFrame>,
    sequence: u64,
    paused: bool,
    deferred_prepare: bool,
    fatal: Option<String>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Prepare => self.on_prepare(),
                Command::Deliver(reply) => {
                    let _ = reply.send(self.on_deliver());
                }
                Command::Restore(reply) => {
                    let _ = reply.send(self.on_restore());
                }
                Command::Reset(reply) => {
                    let _ = reply.send(self.on_reset());
                }
                Command::SetArea(area, reply) => {
                    let _ = reply.send(self.on_set_area(area));
                }
                Command::ScreenSize(reply) => {
                    let _ = reply.send(Ok(self.capture.screen_size()));
                }
                Command::SetQuality(quality, reply) => {
                    self.quality = quality.clamp(0.0, 1.0);
                    let _ = reply.send(Ok(()));
                }
                Command::GetQuality(reply) => {
                    let _ = reply.send(Ok(self.quality));
                }
                Command::SetDelta(enabled, reply) => {
                    let _ = reply.send(Ok(self.on_set_delta(enabled)));
                }
                Command::GetDelta(reply) => {
                    let _ = reply.send(Ok(self.delta_enabled));
                }
                Command::SetEncryption(enabled, reply) => {
                    let _ = reply.send(Ok(self.on_set_encryption(enabled)));
                }
                Command::GetEncryption(reply) => {
                    let _ = reply.send(Ok(self.encryption_enabled));
                }
                Command::Pause(reply) => {
                    self.paused = true;
                    let _ = reply.send(Ok(()));
                }
                Command::Resume => {
                    self.paused = false;
                    if std::mem::take(&mut self.deferred_prepare) {
                        self.on_prepare();
                    }
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }
        debug!("capture pipeline worker stopped");
    }

    fn on_prepare(&mut self) {
        if self.fatal.is_some() {
            return;
        }
        if self.paused {
            self.deferred_prepare = true;
            return;
        }
        if let Err(e) = self.run_cycle() {
            error!(error = %e, "capture cycle failed, pipeline is now fatal");
            self.fatal = Some(e.to_string());
            self.pending = None;
        }
    }

    fn run_cycle(&mut self) -> Result<(), MiraError> {
        let captured = self.capture.capture_region(self.area)?;
        if !captured.same_dimensions(&self.reference) {
            warn!(
                got_width = captured.width(),
                got_height = captured.height(),
                want_width = self.reference.width(),
                want_height = self.reference.height(),
                "capture dimensions drifted, resetting reference"
            );
            self.reference = PixelBuffer::black(captured.width(), captured.height());
        }

        let to_encode = if self.delta_enabled {
            DeltaCodec::encode(&self.reference, &captured)?
        } else {
            captured
        };
        let plain = self.codec.encode(&to_encode, self.quality)?;

        // With delta frames on, the reference advances immediately to
        // the client's lossy reconstruction of this frame, so both
        // sides keep bit-identical references.
        let restored = if self.delta_enabled {
            let lossy_delta = self.codec.decode(&plain)?;
            self.reference = DeltaCodec::decode(&self.reference, &lossy_delta)?;
            true
        } else {
            false
        };

        let data = match &self.cipher {
            Some(c) if self.encryption_enabled => c.encrypt(&plain),
            _ => plain.clone(),
        };

        self.sequence += 1;
        self.pending = Some(PendingFrame {
            frame: EncodedFrame {
                sequence: self.sequence,
                width: to_encode.width(),
                height: to_encode.height(),
                delta: self.delta_enabled,
                encrypted: self.encryption_enabled,
                data,
            },
            plain,
            restored,
            delivered: false,
        });
        Ok(())
    }

    /// Serve the staged frame exactly once; a repeat without a fresh
    /// prepare gets `NoFrame`, so no frame is ever delivered twice.
    fn on_deliver(&mut self) -> Result<EncodedFrame, MiraError> {
        if let Some(msg) = &self.fatal {
            return Err(MiraError::Fatal(msg.clone()));
        }
        match self.pending.as_mut() {
            Some(p) if !p.delivered => {
                p.delivered = true;
                Ok(p.frame.clone())
            }
            _ => Err(MiraError::NoFrame),
        }
    }

    fn on_restore(&mut self) -> Result<(), MiraError> {
        if let Some(msg) = &self.fatal {
            return Err(MiraError::Fatal(msg.clone()));
        }
        let pending = match self.pending.as_mut() {
            Some(p) => p,
            None => return Err(MiraError::NoFrame),
        };
        if pending.restored {
            return Ok(());
        }

        let decoded = self.codec.decode(&pending.plain)?;
        self.reference = if pending.frame.delta {
            DeltaCodec::decode(&self.reference, &decoded)?
        } else {
            decoded
        };
        pending.restored = true;
        Ok(())
    }

    fn on_reset(&mut self) -> Result<Area, MiraError> {
        let (width, height) = self.capture.screen_size();
        self.area = Area::full_screen(width, height);
        self.invalidate_reference();
        Ok(self.area)
    }

    fn on_set_area(&mut self, area: Area) -> Result<(), MiraError> {
        let (width, height) = self.capture.screen_size();
        if !area.fits_within(width, height) {
            return Err(MiraError::InvalidArea {
                area,
                screen_width: width,
                screen_height: height,
            });
        }
        self.area = area;
        self.invalidate_reference();
        Ok(())
    }

    fn on_set_delta(&mut self, enabled: bool) {
        if self.delta_enabled != enabled {
            self.delta_enabled = enabled;
            self.invalidate_reference();
        }
    }

    fn on_set_encryption(&mut self, enabled: bool) {
        if self.encryption_enabled != enabled {
            self.encryption_enabled = enabled;
            self.cipher = enabled
                .then(|| CipherTransport::new(self.cipher_factory.derive(&self.cipher_key)));
            self.invalidate_reference();
        }
    }

    /// Reset the reference to black and drop any staged frame.
    fn invalidate_reference(&mut self) {
        self.reference = PixelBuffer::black(self.area.width, self.area.height);
        self.pending = None;
    }
}

// ── Tests ────────────────────────────────────────────────────────
