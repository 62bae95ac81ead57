//! Hashed challenge-response used by the stand-alone wake gate.
//!
//! # Exchange (one per TCP connection)
//!
//! ```text
//! Server                                   Client
//! ──────                                   ──────
//! accept
//! N = random in 0..=9_999_999_999
//! send "N" (ASCII decimal, no delimiter) ─►
//!                                          d = md5_hex(N ++ secret ++ N)
//!                                      ◄── send d (32 lowercase hex chars)
//! compare first 32 bytes with expected
//! send "no"  if they match  (accepted) ──►
//! send "yes" otherwise      (rejected) ──►
//! close
//! ```
//!
//! The decoy tokens are deliberately inverted so a casual observer poking the
//! port learns nothing from the reply.
//!
//! # Security notes
//!
//! The digest is MD5 over a secret sandwiched between two copies of the
//! nonce.  It keeps the secret off the wire but offers only weak replay
//! resistance: nonces are not remembered across connections, so an observed
//! response is only useless because the next nonce is (very likely)
//! different.  Comparison is constant-time.

use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

/// Largest nonce the server issues (inclusive).
pub const NONCE_MAX: u64 = 9_999_999_999;

/// Length of the hex digest the client must send.
pub const DIGEST_HEX_LEN: usize = 32;

/// Sent after a correct response.  Intentionally reads like a refusal.
pub const ACCEPT_TOKEN: &[u8] = b"no";

/// Sent after an incorrect, short or missing response.
pub const REJECT_TOKEN: &[u8] = b"yes";

/// Computes the expected response for `nonce` under `secret`.
///
/// # Example
///
/// ```rust
/// use lanwake_core::protocol::challenge::challenge_digest;
///
/// let d = challenge_digest(42, "hunter2");
/// assert_eq!(d.len(), 32);
/// assert!(d.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
/// ```
pub fn challenge_digest(nonce: u64, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(secret.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Errors from misusing a [`ChallengeSession`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    /// A second decision was requested for the same session.
    #[error("challenge session {0} was already consumed")]
    AlreadyConsumed(Uuid),
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The nonce has been generated; no decision yet.
    Issued,
    /// A verdict has been produced.  The session cannot be used again.
    Consumed,
}

/// Why a response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 32 or more bytes arrived but the first 32 did not match.
    Mismatch,
    /// The peer sent fewer than 32 bytes before closing.
    ShortResponse,
    /// Nothing usable arrived before the inactivity timeout or a read error.
    NoResponse,
}

/// Outcome of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

impl Verdict {
    /// The decoy token to send to the peer.
    pub fn token(&self) -> &'static [u8] {
        match self {
            Verdict::Accepted => ACCEPT_TOKEN,
            Verdict::Rejected(_) => REJECT_TOKEN,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Per-connection challenge state.
///
/// Created when a connection is accepted and dropped when it closes.  Exactly
/// one of [`respond`](Self::respond) or [`abandon`](Self::abandon) succeeds;
/// any later call returns [`ChallengeError::AlreadyConsumed`].
pub struct ChallengeSession {
    id: Uuid,
    nonce: u64,
    expected: String,
    state: SessionState,
}

impl ChallengeSession {
    /// Issues a session with a fresh random nonce.
    pub fn issue(secret: &str) -> Self {
        Self::with_nonce(OsRng.gen_range(0..=NONCE_MAX), secret)
    }

    /// Issues a session with a caller-chosen nonce.
    pub fn with_nonce(nonce: u64, secret: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            nonce,
            expected: challenge_digest(nonce, secret),
            state: SessionState::Issued,
        }
    }

    /// Identifier used to correlate log lines for one connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The bytes to send to the peer: the nonce in ASCII decimal.
    pub fn challenge(&self) -> Vec<u8> {
        self.nonce.to_string().into_bytes()
    }

    /// Judges the peer's response and consumes the session.
    ///
    /// Only the first 32 bytes are examined; anything after them is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChallengeError::AlreadyConsumed`] if a verdict was already
    /// produced for this session.
    pub fn respond(&mut self, response: &[u8]) -> Result<Verdict, ChallengeError> {
        self.consume()?;

        if response.len() < DIGEST_HEX_LEN {
            return Ok(Verdict::Rejected(RejectReason::ShortResponse));
        }
        let matches: bool = response[..DIGEST_HEX_LEN]
            .ct_eq(self.expected.as_bytes())
            .into();
        if matches {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::Rejected(RejectReason::Mismatch))
        }
    }

    /// Rejects the session without a usable response (timeout, read error).
    ///
    /// # Errors
    ///
    /// Returns [`ChallengeError::AlreadyConsumed`] if a verdict was already
    /// produced for this session.
    pub fn abandon(&mut self) -> Result<Verdict, ChallengeError> {
        self.consume()?;
        Ok(Verdict::Rejected(RejectReason::NoResponse))
    }

    fn consume(&mut self) -> Result<(), ChallengeError> {
        if self.state == SessionState::Consumed {
            return Err(ChallengeError::AlreadyConsumed(self.id));
        }
        self.state = SessionState::Consumed;
        Ok(())
    }
}

impl std::fmt::Debug for ChallengeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `expected` is derived from the secret and must not reach the logs.
        f.debug_struct("ChallengeSession")
            .field("id", &self.id)
            .field("nonce", &self.nonce)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
