//! Viewer-side frame reception.
//!
//! [`ClientReceiver`] mirrors the server pipeline in reverse: decrypt,
//! decode, delta-restore, then composite the region into a full-screen
//! canvas. [`ReceiverDriver`] wraps it in the streaming loop, with one
//! task fetching ahead while the other decodes, and publishes finished
//! canvases over a `watch` channel so the UI always paints the newest
//! complete frame. While the loop runs, the receiver is reconfigured
//! through a [`ReceiverControl`], whose commands are observed at cycle
//! boundaries so a mid-stream area or cipher change never tears a
//! half-composited canvas.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::cipher::CipherTransport;
use crate::codec::LossyCodec;
use crate::delta::DeltaCodec;
use crate::error::MiraError;
use crate::frame::{Area, PixelBuffer};
use crate::pipeline::EncodedFrame;

/// Consecutive per-frame transport failures tolerated before the
/// stream is abandoned.
const MAX_TRANSPORT_SKIPS: u32 = 3;

const COMMAND_BUFFER: usize = 8;

// ── FrameSource ──────────────────────────────────────────────────

/// Where the driver gets its frames from, normally a connected
/// [`RemoteSession`](crate::net::RemoteSession).
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Ask the far side to start producing the next frame.
    async fn prepare_frame(&self) -> Result<(), MiraError>;

    /// Fetch the frame the far side has staged.
    async fn fetch_frame(&self) -> Result<EncodedFrame, MiraError>;

    /// Tell the far side to install the staged frame as its reference.
    async fn restore_frame(&self) -> Result<(), MiraError>;
}

// ── ClientReceiver ───────────────────────────────────────────────

/// Decodes incoming frames and keeps the composite screen canvas.
pub struct ClientReceiver {
    codec: Arc<dyn LossyCodec>,
    cipher: Option<CipherTransport>,
    delta_enabled: bool,
    area: Area,
    reference: PixelBuffer,
    canvas: PixelBuffer,
    last_sequence: Option<u64>,
}

impl ClientReceiver {
    /// A receiver for a screen of the given size, streaming the full
    /// screen initially.
    pub fn new(
        codec: Arc<dyn LossyCodec>,
        cipher: Option<CipherTransport>,
        screen_width: u32,
        screen_height: u32,
    ) -> Self {
        let area = Area::full_screen(screen_width, screen_height);
        Self {
            codec,
            cipher,
            delta_enabled: false,
            area,
            reference: PixelBuffer::black(area.width, area.height),
            canvas: PixelBuffer::black(screen_width, screen_height),
            last_sequence: None,
        }
    }

    /// Switch to a new streamed area, invalidating the reference to
    /// match the far side.
    pub fn set_area(&mut self, area: Area) {
        self.area = area;
        self.reference = PixelBuffer::black(area.width, area.height);
    }

    /// Note a delta toggle on the far side. An actual change resets the
    /// far side's reference and so must reset ours; repeating the
    /// current value keeps the reference intact.
    pub fn set_delta_enabled(&mut self, enabled: bool) {
        if self.delta_enabled != enabled {
            self.delta_enabled = enabled;
            self.reference = PixelBuffer::black(self.area.width, self.area.height);
        }
    }

    /// Swap the stream cipher in or out, invalidating the reference.
    pub fn set_cipher(&mut self, cipher: Option<CipherTransport>) {
        self.cipher = cipher;
        self.reference = PixelBuffer::black(self.area.width, self.area.height);
    }

    /// The composite canvas as of the last applied frame.
    pub fn canvas(&self) -> &PixelBuffer {
        &self.canvas
    }

    /// Apply one incoming frame and return the updated canvas.
    ///
    /// Duplicate or regressing sequence numbers are rejected with
    /// [`MiraError::FrameOrder`]; a forward gap is tolerated with a
    /// warning, since a skipped frame only costs delta fidelity until
    /// the next reference reset.
    pub fn apply(&mut self, frame: &EncodedFrame) -> Result<&PixelBuffer, MiraError> {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                return Err(MiraError::FrameOrder {
                    last,
                    actual: frame.sequence,
                });
            }
            if frame.sequence > last + 1 {
                warn!(last, actual = frame.sequence, "sequence gap in frame stream");
            }
        }
        self.last_sequence = Some(frame.sequence);

        let plain;
        let data: &[u8] = if frame.encrypted {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or(MiraError::ProtocolViolation("encrypted frame without a session cipher"))?;
            plain = cipher.decrypt(&frame.data);
            &plain
        } else {
            &frame.data
        };

        let decoded = self.codec.decode(data)?;
        if !decoded.same_dimensions(&self.reference) {
            warn!(
                got_width = decoded.width(),
                got_height = decoded.height(),
                want_width = self.reference.width(),
                want_height = self.reference.height(),
                "frame dimensions drifted, resetting reference"
            );
            self.reference = PixelBuffer::black(decoded.width(), decoded.height());
        }

        let image = if frame.delta {
            let restored = DeltaCodec::decode(&self.reference, &decoded)?;
            self.reference = restored.clone();
            restored
        } else {
            decoded
        };

        self.canvas.blit(&image, self.area.x, self.area.y)?;
        Ok(&self.canvas)
    }
}

// ── ReceiverDriver ───────────────────────────────────────────────

/// Lifecycle of the streaming loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

enum ReceiverCommand {
    SetArea(Area, oneshot::Sender<()>),
    SetDeltaEnabled(bool, oneshot::Sender<()>),
    SetCipher(Option<CipherTransport>, oneshot::Sender<()>),
}

/// Reconfigures a running [`ReceiverDriver`]'s receiver.
///
/// Each call resolves once the command has been applied, which happens
/// at the next cycle boundary. A frame fetched before the command was
/// applied may still arrive with the old geometry; the receiver's
/// dimension-drift reset absorbs it.
#[derive(Clone)]
pub struct ReceiverControl {
    tx: mpsc::Sender<ReceiverCommand>,
}

impl ReceiverControl {
    /// Retarget composition after the far side's area changed.
    pub async fn set_area(&self, area: Area) -> Result<(), MiraError> {
        self.call(|ack| ReceiverCommand::SetArea(area, ack)).await
    }

    /// Mirror a delta toggle on the far side.
    pub async fn set_delta_enabled(&self, enabled: bool) -> Result<(), MiraError> {
        self.call(|ack| ReceiverCommand::SetDeltaEnabled(enabled, ack))
            .await
    }

    /// Swap the stream cipher after toggling encryption on the far side.
    pub async fn set_cipher(&self, cipher: Option<CipherTransport>) -> Result<(), MiraError> {
        self.call(|ack| ReceiverCommand::SetCipher(cipher, ack)).await
    }

    async fn call(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> ReceiverCommand,
    ) -> Result<(), MiraError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(make(ack_tx)).await?;
        ack_rx.await?;
        Ok(())
    }
}

/// Runs the fetch/decode loop until stopped or the stream dies.
pub struct ReceiverDriver {
    source: Arc<dyn FrameSource>,
    receiver: ClientReceiver,
    frames: watch::Sender<Arc<PixelBuffer>>,
    run_state: watch::Receiver<RunState>,
    // Kept alive so the command channel never closes mid-run.
    control: mpsc::Sender<ReceiverCommand>,
    commands: mpsc::Receiver<ReceiverCommand>,
}

impl ReceiverDriver {
    /// Build a driver plus the canvas subscription and the lifecycle
    /// control handle.
    pub fn new(
        source: Arc<dyn FrameSource>,
        receiver: ClientReceiver,
    ) -> (
        Self,
        watch::Receiver<Arc<PixelBuffer>>,
        watch::Sender<RunState>,
    ) {
        let (frames_tx, frames_rx) = watch::channel(Arc::new(receiver.canvas().clone()));
        let (state_tx, state_rx) = watch::channel(RunState::Running);
        let (control_tx, control_rx) = mpsc::channel(COMMAND_BUFFER);
        (
            Self {
                source,
                receiver,
                frames: frames_tx,
                run_state: state_rx,
                control: control_tx,
                commands: control_rx,
            },
            frames_rx,
            state_tx,
        )
    }

    /// A handle for reconfiguring the receiver while the loop runs.
    pub fn control(&self) -> ReceiverControl {
        ReceiverControl {
            tx: self.control.clone(),
        }
    }

    /// Drive the stream to completion.
    ///
    /// Per-frame transport failures, and `NoFrame` from a staged frame
    /// invalidated by a concurrent parameter change, are logged and
    /// skipped up to [`MAX_TRANSPORT_SKIPS`] in a row; anything else
    /// ends the stream with the error.
    pub async fn run(mut self) -> Result<(), MiraError> {
        let (tx, mut rx) = mpsc::channel::<Result<EncodedFrame, MiraError>>(1);
        let source = self.source.clone();
        let mut state = self.run_state.clone();

        // Fetch task: runs one full prepare/fetch/restore exchange
        // ahead of the decoder.
        let fetcher = tokio::spawn(async move {
            loop {
                match state.wait_for(|s| *s != RunState::Paused).await {
                    Ok(s) if *s == RunState::Stopped => break,
                    Ok(_) => {}
                    // Control handle dropped: stop.
                    Err(_) => break,
                }
                let result = Self::fetch_one(source.as_ref()).await;
                if tx.send(result).await.is_err() {
                    break;
                }
            }
        });

        enum Step {
            Frame(Option<Result<EncodedFrame, MiraError>>),
            Command(Option<ReceiverCommand>),
            Stop,
        }

        let mut skips = 0u32;
        let outcome = loop {
            let step = tokio::select! {
                item = rx.recv() => Step::Frame(item),
                cmd = self.commands.recv() => Step::Command(cmd),
                res = self.run_state.wait_for(|s| *s == RunState::Stopped) => {
                    let _ = res;
                    Step::Stop
                }
            };
            let item = match step {
                Step::Stop => break Ok(()),
                Step::Command(Some(cmd)) => {
                    self.apply_command(cmd);
                    continue;
                }
                // The driver holds a sender, so the command channel
                // cannot close while running.
                Step::Command(None) => continue,
                Step::Frame(None) => break Ok(()),
                Step::Frame(Some(item)) => item,
            };

            match item {
                Ok(frame) => match self.receiver.apply(&frame) {
                    Ok(canvas) => {
                        skips = 0;
                        let _ = self.frames.send(Arc::new(canvas.clone()));
                    }
                    Err(e @ MiraError::FrameOrder { .. }) => {
                        warn!(error = %e, "dropping out-of-order frame");
                    }
                    Err(e) => break Err(e),
                },
                Err(e) if e.is_transport() || matches!(e, MiraError::NoFrame) => {
                    skips += 1;
                    warn!(error = %e, skips, "skipping frame");
                    if skips > MAX_TRANSPORT_SKIPS {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        fetcher.abort();
        debug!("receiver driver stopped");
        outcome
    }

    fn apply_command(&mut self, cmd: ReceiverCommand) {
        match cmd {
            ReceiverCommand::SetArea(area, ack) => {
                self.receiver.set_area(area);
                let _ = ack.send(());
            }
            ReceiverCommand::SetDeltaEnabled(enabled, ack) => {
                self.receiver.set_delta_enabled(enabled);
                let _ = ack.send(());
            }
            ReceiverCommand::SetCipher(cipher, ack) => {
                self.receiver.set_cipher(cipher);
                let _ = ack.send(());
            }
        }
    }

    async fn fetch_one(source: &dyn FrameSource) -> Result<EncodedFrame, MiraError> {
        source.prepare_frame().await?;
        let frame = source.fetch_frame().await?;
        source.restore_frame().await?;
        Ok(frame)
    }
}

// ── Tests ────────────────────────────────────────────────────────
