//! The accepting side: one task per connection, framed requests in,
//! framed responses out.
//!
//! A connection moves through two phases. Before authentication only
//! the challenge/authenticate exchange is answered; everything else
//! gets an opaque `Unauthorized`. After login the connection owns a
//! [`SessionController`], and dropping the connection implies logout.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::auth::AuthService;
use crate::error::MiraError;
use crate::proto::{Request, Response, ServerCodec, WireError};
use crate::session::{Capabilities, SessionController};

// ── StreamServer ─────────────────────────────────────────────────

/// Accepts viewer connections and serves sessions over them.
pub struct StreamServer {
    listener: TcpListener,
    caps: Capabilities,
    auth: Arc<AuthService>,
}

impl StreamServer {
    /// Bind the listener. `addr` may carry port 0 for tests.
    pub async fn bind(
        addr: SocketAddr,
        caps: Capabilities,
        auth: Arc<AuthService>,
    ) -> Result<Self, MiraError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "stream server listening");
        Ok(Self {
            listener,
            caps,
            auth,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MiraError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<(), MiraError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "connection accepted");
            let caps = self.caps.clone();
            let auth = self.auth.clone();
            tokio::spawn(async move {
                if let Err(e) = Connection::new(stream, peer, caps, auth).serve().await {
                    warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

// ── Connection ───────────────────────────────────────────────────

enum Phase {
    Unauthenticated,
    Active(SessionController),
}

struct Connection {
    framed: Framed<TcpStream, ServerCodec>,
    peer: SocketAddr,
    caps: Capabilities,
    auth: Arc<AuthService>,
    phase: Phase,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, caps: Capabilities, auth: Arc<AuthService>) -> Self {
        Self {
            framed: Framed::new(stream, ServerCodec::new()),
            peer,
            caps,
            auth,
            phase: Phase::Unauthenticated,
        }
    }

    async fn serve(mut self) -> Result<(), MiraError> {
        let outcome = self.message_loop().await;

        // Connection loss while a session is live implies logout.
        if let Phase::Active(ctl) = &self.phase {
            if let Err(e) = ctl.logout().await {
                debug!(peer = %self.peer, error = %e, "logout on disconnect failed");
            }
        }
        outcome
    }

    async fn message_loop(&mut self) -> Result<(), MiraError> {
        while let Some(request) = self.framed.next().await {
            let request = request?;
            let (response, done) = self.dispatch(request).await;
            self.framed.send(response).await?;
            if done {
                break;
            }
        }
        Ok(())
    }

    /// Handle one request; the flag asks the loop to close afterwards.
    async fn dispatch(&mut self, request: Request) -> (Response, bool) {
        if matches!(self.phase, Phase::Unauthenticated) {
            self.dispatch_unauthenticated(request)
        } else {
            self.dispatch_active(request).await
        }
    }

    fn dispatch_unauthenticated(&mut self, request: Request) -> (Response, bool) {
        let identity = self.peer.to_string();
        match request {
            Request::IssueChallenge => match self.auth.issue_challenge(&identity) {
                Ok(nonce) => (Response::Challenge(nonce), false),
                Err(e) => (Response::Error(WireError::from(&e)), false),
            },
            Request::Authenticate { username, response } => {
                match self.auth.authenticate(&identity, &username, &response) {
                    Ok(session) => {
                        self.phase = Phase::Active(SessionController::start(session, &self.caps));
                        (Response::Authenticated, false)
                    }
                    Err(e) => (Response::Error(WireError::from(&e)), false),
                }
            }
            other => {
                debug!(peer = %self.peer, request = ?other, "request before login");
                (Response::Error(WireError::Unauthorized), false)
            }
        }
    }

    async fn dispatch_active(&mut self, request: Request) -> (Response, bool) {
        let ctl = match &self.phase {
            Phase::Active(ctl) => ctl,
            Phase::Unauthenticated => unreachable!("dispatch_active requires an active phase"),
        };

        if let Request::Logout = request {
            let result = ctl.logout().await;
            return (Self::ack(result), true);
        }

        let result: Result<Response, MiraError> = match request {
            Request::PrepareFrame => ctl.prepare_frame().await.map(|()| Response::Ack),
            Request::GetFrame => ctl.get_frame().await.map(Response::Frame),
            Request::RestoreFrame => ctl.restore_frame().await.map(|()| Response::Ack),
            Request::Reset => ctl.reset().await.map(Response::Area),
            Request::SetArea(area) => ctl.set_area(area).await.map(|()| Response::Ack),
            Request::ScreenSize => ctl
                .screen_size()
                .await
                .map(|(width, height)| Response::ScreenSize { width, height }),
            Request::GetQuality => ctl.quality().await.map(Response::Quality),
            Request::SetQuality(q) => ctl.set_quality(q).await.map(|()| Response::Ack),
            Request::GetDelta => ctl.delta_enabled().await.map(Response::Flag),
            Request::SetDelta(on) => ctl.set_delta_enabled(on).await.map(|()| Response::Ack),
            Request::GetEncryption => ctl.encryption_enabled().await.map(Response::Flag),
            Request::SetEncryption(on) => {
                ctl.set_encryption_enabled(on).await.map(|()| Response::Ack)
            }
            Request::Pointer(event) => ctl.pointer_event(event).map(|()| Response::Ack),
            Request::Key(event) => ctl.key_event(event).map(|()| Response::Ack),
            Request::IssueChallenge | Request::Authenticate { .. } => {
                Err(MiraError::ProtocolViolation("login inside an active session"))
            }
            Request::Logout => unreachable!("handled above"),
        };

        match result {
            Ok(response) => (response, false),
            Err(e @ MiraError::Fatal(_)) => {
                // A fatal pipeline error tears the session down.
                warn!(peer = %self.peer, error = %e, "session is fatal, closing");
                if let Phase::Active(ctl) = &self.phase {
                    let _ = ctl.logout().await;
                }
                (Response::Error(WireError::from(&e)), true)
            }
            Err(e) => (Response::Error(WireError::from(&e)), false),
        }
    }

    fn ack(result: Result<(), MiraError>) -> Response {
        match result {
            Ok(()) => Response::Ack,
            Err(e) => Response::Error(WireError::from(&e)),
        }
    }
}
