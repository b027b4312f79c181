//! Integration tests — login handshake, the full frame cycle, and
//! session teardown over a real TCP connection on localhost.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use mira_core::cipher::{BlockCipher, CipherFactory, CipherKey, CipherTransport, BLOCK_SIZE};
use mira_core::receiver::FrameSource;
use mira_core::settings::MemorySettingsStore;
use mira_core::{
    Area, AuthService, Capabilities, ClientReceiver, InputInjector, JpegCodec, KeyEvent,
    LossyCodec, MiraError, PixelBuffer, PointerEvent, ReceiverDriver, RunState, ScreenCapture,
    SettingsStore, StreamServer,
};
use mira_core::{RemoteSession, input::PointerButton};

// ── Fakes ────────────────────────────────────────────────────────

struct SolidCapture {
    width: u32,
    height: u32,
    rgb: [u8; 3],
}

impl ScreenCapture for SolidCapture {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture_region(&self, area: Area) -> Result<PixelBuffer, MiraError> {
        let data = self
            .rgb
            .iter()
            .copied()
            .cycle()
            .take(area.pixel_count() * 3)
            .collect();
        PixelBuffer::from_raw(area.width, area.height, data)
    }
}

#[derive(Default)]
struct RecordingInjector {
    pointer: Mutex<Vec<PointerEvent>>,
    keys: Mutex<Vec<KeyEvent>>,
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

struct XorCipher {
    key: [u8; BLOCK_SIZE],
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

struct XorFactory;

impl CipherFactory for XorFactory {
    fn derive(&self, key: &CipherKey) -> Box<dyn BlockCipher> {
        let mut block_key = [0u8; BLOCK_SIZE];
        block_key.copy_from_slice(&key.as_bytes()[..BLOCK_SIZE]);
        Box::new(XorCipher { key: block_key })
    }
}

// ── Harness ──────────────────────────────────────────────────────

struct Harness {
    addr: SocketAddr,
    injector: Arc<RecordingInjector>,
}

async fn start_server(rgb: [u8; 3]) -> Harness {
    let injector = Arc::new(RecordingInjector::default());
    let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
    settings.add_user("alice", "secret").unwrap();

    let caps = Capabilities {
        capture: Arc::new(SolidCapture {
            width: 100,
            height: 100,
            rgb,
        }),
        injector: injector.clone(),
        codec: Arc::new(JpegCodec),
        cipher: Arc::new(XorFactory),
        settings: settings.clone(),
    };
    let auth = Arc::new(AuthService::new(settings));

    let server = StreamServer::bind("127.0.0.1:0".parse().unwrap(), caps, auth)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    Harness { addr, injector }
}

async fn login(addr: SocketAddr) -> (RemoteSession, CipherKey) {
    let session = RemoteSession::connect(addr).await.unwrap();
    let key = session.login("alice", "secret").await.unwrap();
    (session, key)
}

// ── Authentication ───────────────────────────────────────────────

#[tokio::test]
async fn login_succeeds_with_correct_credentials() {
    let h = start_server([0, 0, 0]).await;
    let session = RemoteSession::connect(h.addr).await.unwrap();
    session.login("alice", "secret").await.unwrap();
    // A post-login call works.
    assert_eq!(session.screen_size().await.unwrap(), (100, 100));
}

#[tokio::test]
async fn login_fails_opaquely_for_bad_password_and_unknown_user() {
    let h = start_server([0, 0, 0]).await;

    let session = RemoteSession::connect(h.addr).await.unwrap();
    let err = session.login("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, MiraError::Unauthorized));

    let session = RemoteSession::connect(h.addr).await.unwrap();
    let err = session.login("mallory", "secret").await.unwrap_err();
    assert!(matches!(err, MiraError::Unauthorized));
}

#[tokio::test]
async fn requests_before_login_are_rejected() {
    let h = start_server([0, 0, 0]).await;
    let session = RemoteSession::connect(h.addr).await.unwrap();
    let err = session.screen_size().await.unwrap_err();
    assert!(matches!(err, MiraError::Unauthorized));
}

// ── Frame cycle ──────────────────────────────────────────────────

#[tokio::test]
async fn black_screen_streams_as_near_black_jpeg() {
    let h = start_server([0, 0, 0]).await;
    let (session, _) = login(h.addr).await;

    session.prepare_frame().await.unwrap();
    let frame = session.fetch_frame().await.unwrap();
    session.restore_frame().await.unwrap();

    assert_eq!(frame.sequence, 1);
    assert_eq!((frame.width, frame.height), (100, 100));
    assert!(!frame.delta);
    assert!(!frame.encrypted);

    let decoded = JpegCodec.decode(&frame.data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 100));
    for &b in decoded.data() {
        assert!(b <= 2, "channel drifted to {b}");
    }
}

#[tokio::test]
async fn get_frame_before_prepare_reports_no_frame() {
    let h = start_server([0, 0, 0]).await;
    let (session, _) = login(h.addr).await;
    let err = session.fetch_frame().await.unwrap_err();
    assert!(matches!(err, MiraError::NoFrame));
}

#[tokio::test]
async fn delta_frame_of_static_screen_is_near_mid_gray() {
    let h = start_server([0x40, 0x80, 0xC0]).await;
    let (session, _) = login(h.addr).await;
    session.set_delta_enabled(true).await.unwrap();
    assert!(session.delta_enabled().await.unwrap());

    // First cycle establishes the reference, second is the static
    // screen against it.
    session.prepare_frame().await.unwrap();
    session.fetch_frame().await.unwrap();
    session.prepare_frame().await.unwrap();
    let frame = session.fetch_frame().await.unwrap();

    assert!(frame.delta);
    let decoded = JpegCodec.decode(&frame.data).unwrap();
    // Tolerance covers JPEG colourspace drift accumulated through the
    // reference reconstruction.
    for &b in decoded.data() {
        assert!(
            (b as i32 - 128).abs() <= 8,
            "delta channel drifted to {b}"
        );
    }
}

#[tokio::test]
async fn encrypted_frames_decrypt_with_the_login_key() {
    let h = start_server([0x20, 0x20, 0x20]).await;
    let (session, key) = login(h.addr).await;
    session.set_encryption_enabled(true).await.unwrap();

    session.prepare_frame().await.unwrap();
    let frame = session.fetch_frame().await.unwrap();
    assert!(frame.encrypted);

    // Ciphertext is not a decodable JPEG.
    assert!(JpegCodec.decode(&frame.data).is_err());

    let transport = CipherTransport::new(XorFactory.derive(&key));
    let decoded = JpegCodec.decode(&transport.decrypt(&frame.data)).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 100));
}

#[tokio::test]
async fn midstream_encryption_toggle_keeps_the_stream_alive() {
    let h = start_server([0x30, 0x60, 0x90]).await;
    let session = Arc::new(RemoteSession::connect(h.addr).await.unwrap());
    let key = session.login("alice", "secret").await.unwrap();

    let receiver = ClientReceiver::new(Arc::new(JpegCodec), None, 100, 100);
    let (driver, mut frames, state) = ReceiverDriver::new(session.clone(), receiver);
    let control = driver.control();
    let handle = tokio::spawn(driver.run());

    frames.changed().await.unwrap();

    // Pause the stream and flip encryption on both sides, installing
    // the cipher first so every frame past the toggle is decryptable.
    state.send(RunState::Paused).unwrap();
    control
        .set_cipher(Some(CipherTransport::new(XorFactory.derive(&key))))
        .await
        .unwrap();
    session.set_encryption_enabled(true).await.unwrap();
    state.send(RunState::Running).unwrap();

    // Enough updates to outlast any plain frames fetched before the
    // pause: encrypted frames are flowing and decrypting.
    for _ in 0..4 {
        frames.changed().await.unwrap();
    }

    state.send(RunState::Stopped).unwrap();
    assert!(handle.await.unwrap().is_ok());
}

// ── Area ─────────────────────────────────────────────────────────

#[tokio::test]
async fn area_changes_are_validated_and_applied() {
    let h = start_server([9, 9, 9]).await;
    let (session, _) = login(h.addr).await;

    let err = session
        .set_area(Area::new(60, 60, 50, 50))
        .await
        .unwrap_err();
    assert!(matches!(err, MiraError::ProtocolViolation(_)));

    session.set_area(Area::new(10, 10, 30, 20)).await.unwrap();
    session.prepare_frame().await.unwrap();
    let frame = session.fetch_frame().await.unwrap();
    assert_eq!((frame.width, frame.height), (30, 20));

    let area = session.reset().await.unwrap();
    assert_eq!(area, Area::full_screen(100, 100));
}

// ── Input ────────────────────────────────────────────────────────

#[tokio::test]
async fn input_events_are_injected_on_the_served_machine() {
    let h = start_server([0, 0, 0]).await;
    let (session, _) = login(h.addr).await;

    session
        .pointer_event(PointerEvent::pressed(10, 20, PointerButton::Left))
        .await
        .unwrap();
    session.key_event(KeyEvent::pressed(65)).await.unwrap();
    session.key_event(KeyEvent::released(65)).await.unwrap();

    let pointer = h.injector.pointer.lock().unwrap().clone();
    assert_eq!(pointer, vec![PointerEvent::pressed(10, 20, PointerButton::Left)]);
    let keys = h.injector.keys.lock().unwrap().clone();
    assert_eq!(keys, vec![KeyEvent::pressed(65), KeyEvent::released(65)]);
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn logout_ends_the_session() {
    let h = start_server([0, 0, 0]).await;
    let (session, _) = login(h.addr).await;
    session.logout().await.unwrap();
    // The server closes the connection after logout, so any further
    // call fails.
    assert!(session.screen_size().await.is_err());
}

#[tokio::test]
async fn parameter_changes_survive_relogin() {
    let h = start_server([0, 0, 0]).await;
    let (session, _) = login(h.addr).await;
    session.set_quality(0.9).await.unwrap();
    session.set_delta_enabled(true).await.unwrap();
    session.logout().await.unwrap();

    let (session, _) = login(h.addr).await;
    assert_eq!(session.quality().await.unwrap(), 0.9);
    assert!(session.delta_enabled().await.unwrap());
}
