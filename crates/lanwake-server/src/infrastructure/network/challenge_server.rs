//! Stand-alone challenge gate: a raw TCP listener that wakes one machine.
//!
//! This is the legacy path for clients that cannot speak HTTP.  Each
//! connection runs exactly one exchange (see
//! [`lanwake_core::protocol::challenge`] for the wire format):
//!
//! ```text
//! LISTENING ─accept─► CHALLENGE_SENT ─┬─ digest ok ─► ACCEPTED ─► wake, "no"  ─┐
//!                                     └─ otherwise ─► REJECTED ─►       "yes" ─┴─► CLOSED
//! ```
//!
//! # Reading the response
//!
//! TCP does not preserve message boundaries, so the 32-character digest may
//! arrive in several segments.  The handler keeps reading until 32 bytes
//! have arrived, the peer half-closes, `max_response_bytes` is reached, or no
//! byte has arrived for `read_timeout`.  Only the first 32 bytes are judged.
//!
//! # Scalability
//!
//! Every connection is handled in its own Tokio task and is bounded by the
//! inactivity timeout.  Connections are neither rate-limited nor capped.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use lanwake_core::protocol::challenge::DIGEST_HEX_LEN;
use lanwake_core::{ChallengeError, ChallengeSession, MacAddress, Verdict};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::wake_device::WakeDeviceUseCase;

/// How long a single `accept()` may block before `running` is re-checked.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Error type for a single gate connection.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
}

/// Settings for the gate.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub secret: String,
    pub target: MacAddress,
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
}

/// The challenge gate: settings plus the wake action it protects.
pub struct ChallengeGate {
    settings: GateSettings,
    waker: Arc<WakeDeviceUseCase>,
}

impl ChallengeGate {
    pub fn new(settings: GateSettings, waker: Arc<WakeDeviceUseCase>) -> Self {
        Self { settings, waker }
    }

    /// Runs one exchange on `stream` and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Io`] if the challenge or the verdict token cannot
    /// be written.  Read failures are not errors; they reject the session.
    pub async fn handle<S>(&self, mut stream: S, peer: SocketAddr) -> Result<Verdict, GateError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = ChallengeSession::issue(&self.settings.secret);
        let id = session.id();
        debug!(session = %id, %peer, "challenge issued");

        stream.write_all(&session.challenge()).await?;
        stream.flush().await?;

        let verdict = match self.read_response(&mut stream).await {
            Ok(response) if response.is_empty() => session.abandon()?,
            Ok(response) => session.respond(&response)?,
            Err(e) => {
                debug!(session = %id, %peer, "response read failed: {e}");
                session.abandon()?
            }
        };

        if verdict.is_accepted() {
            info!(session = %id, %peer, target = %self.settings.target, "challenge accepted");
            if let Err(e) = self.waker.wake_address(self.settings.target).await {
                error!(session = %id, "wake after accepted challenge failed: {e}");
            }
        } else {
            warn!(session = %id, %peer, ?verdict, "challenge rejected");
        }

        stream.write_all(verdict.token()).await?;
        stream.flush().await?;
        // The peer may already be gone; the verdict stands either way.
        let _ = stream.shutdown().await;
        Ok(verdict)
    }

    /// Accumulates the peer's response.  An inactivity timeout ends the read
    /// with whatever has arrived so far.
    async fn read_response<S>(&self, stream: &mut S) -> std::io::Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        let cap = self.settings.max_response_bytes.max(DIGEST_HEX_LEN);
        let mut response = Vec::with_capacity(DIGEST_HEX_LEN);
        let mut chunk = vec![0u8; cap];

        while response.len() < DIGEST_HEX_LEN {
            let room = cap - response.len();
            match timeout(self.settings.read_timeout, stream.read(&mut chunk[..room])).await {
                Err(_) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
            }
        }
        Ok(response)
    }
}

/// Binds the gate listener.
///
/// # Errors
///
/// Returns the bind error unchanged.
pub async fn bind_gate(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("challenge gate listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Runs the accept loop until `running` is set to `false`.
///
/// Each connection is handed to its own task; the loop never waits on a
/// client.
pub async fn run_gate(listener: TcpListener, gate: Arc<ChallengeGate>, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping challenge gate");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    if let Err(e) = gate.handle(stream, peer).await {
                        warn!(%peer, "challenge connection ended with error: {e}");
                    }
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("challenge gate accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
