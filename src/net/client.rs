//! The connecting side: a typed handle over one framed TCP connection.
//!
//! All calls are strict request/response, serialized through an async
//! mutex, so a [`RemoteSession`] can be shared by reference between the
//! streaming driver and UI-originated control calls.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::auth::response_hash;
use crate::cipher::{derive_session_key, CipherKey};
use crate::error::MiraError;
use crate::frame::Area;
use crate::input::{KeyEvent, PointerEvent};
use crate::pipeline::EncodedFrame;
use crate::proto::{ClientCodec, Request, Response};
use crate::receiver::FrameSource;

// ── RemoteSession ────────────────────────────────────────────────

/// A connected, possibly authenticated, remote session.
pub struct RemoteSession {
    framed: Mutex<Framed<TcpStream, ClientCodec>>,
}

impl RemoteSession {
    pub async fn connect(addr: SocketAddr) -> Result<Self, MiraError> {
        let stream = TcpStream::connect(addr).await?;
        debug!(%addr, "connected");
        Ok(Self {
            framed: Mutex::new(Framed::new(stream, ClientCodec::new())),
        })
    }

    /// Run the login ritual: challenge, digest, authenticate. Returns
    /// the session cipher key for an encrypted stream.
    pub async fn login(&self, username: &str, password: &str) -> Result<CipherKey, MiraError> {
        let nonce = match self.call(Request::IssueChallenge).await? {
            Response::Challenge(nonce) => nonce,
            other => return unexpected(other),
        };
        match self
            .call(Request::Authenticate {
                username: username.to_string(),
                response: response_hash(&nonce, password),
            })
            .await?
        {
            Response::Authenticated => Ok(derive_session_key(password)),
            other => unexpected(other),
        }
    }

    // ── Area ─────────────────────────────────────────────────────

    pub async fn reset(&self) -> Result<Area, MiraError> {
        match self.call(Request::Reset).await? {
            Response::Area(area) => Ok(area),
            other => unexpected(other),
        }
    }

    pub async fn set_area(&self, area: Area) -> Result<(), MiraError> {
        self.ack(Request::SetArea(area)).await
    }

    pub async fn screen_size(&self) -> Result<(u32, u32), MiraError> {
        match self.call(Request::ScreenSize).await? {
            Response::ScreenSize { width, height } => Ok((width, height)),
            other => unexpected(other),
        }
    }

    // ── Stream parameters ────────────────────────────────────────

    pub async fn quality(&self) -> Result<f32, MiraError> {
        match self.call(Request::GetQuality).await? {
            Response::Quality(q) => Ok(q),
            other => unexpected(other),
        }
    }

    pub async fn set_quality(&self, quality: f32) -> Result<(), MiraError> {
        self.ack(Request::SetQuality(quality)).await
    }

    pub async fn delta_enabled(&self) -> Result<bool, MiraError> {
        self.flag(Request::GetDelta).await
    }

    pub async fn set_delta_enabled(&self, enabled: bool) -> Result<(), MiraError> {
        self.ack(Request::SetDelta(enabled)).await
    }

    pub async fn encryption_enabled(&self) -> Result<bool, MiraError> {
        self.flag(Request::GetEncryption).await
    }

    pub async fn set_encryption_enabled(&self, enabled: bool) -> Result<(), MiraError> {
        self.ack(Request::SetEncryption(enabled)).await
    }

    // ── Input ────────────────────────────────────────────────────

    pub async fn pointer_event(&self, event: PointerEvent) -> Result<(), MiraError> {
        self.ack(Request::Pointer(event)).await
    }

    pub async fn key_event(&self, event: KeyEvent) -> Result<(), MiraError> {
        self.ack(Request::Key(event)).await
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub async fn logout(&self) -> Result<(), MiraError> {
        self.ack(Request::Logout).await
    }

    // ── Plumbing ─────────────────────────────────────────────────

    async fn call(&self, request: Request) -> Result<Response, MiraError> {
        let mut framed = self.framed.lock().await;
        framed.send(request).await?;
        match framed.next().await {
            Some(Ok(Response::Error(e))) => Err(e.into()),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(e),
            None => Err(MiraError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-call",
            ))),
        }
    }

    async fn ack(&self, request: Request) -> Result<(), MiraError> {
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => unexpected(other),
        }
    }

    async fn flag(&self, request: Request) -> Result<bool, MiraError> {
        match self.call(request).await? {
            Response::Flag(value) => Ok(value),
            other => unexpected(other),
        }
    }
}

fn unexpected<T>(response: Response) -> Result<T, MiraError> {
    debug!(?response, "unexpected response variant");
    Err(MiraError::ProtocolViolation("unexpected response variant"))
}

#[async_trait]
impl FrameSource for RemoteSession {
    async fn prepare_frame(&self) -> Result<(), MiraError> {
        self.ack(Request::PrepareFrame).await
    }

    async fn fetch_frame(&self) -> Result<EncodedFrame, MiraError> {
        match self.call(Request::GetFrame).await? {
            Response::Frame(frame) => Ok(frame),
            other => unexpected(other),
        }
    }

    async fn restore_frame(&self) -> Result<(), MiraError> {
        self.ack(Request::RestoreFrame).await
    }
}
