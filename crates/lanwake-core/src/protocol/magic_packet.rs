//! Wake-on-LAN magic packet synthesis.
//!
//! # Wire format (for beginners)
//!
//! A "magic packet" is a fixed 102-byte payload that a sleeping network card
//! scans for while the rest of the machine is powered down:
//!
//! ```text
//! Offset  Length  Content
//! ──────  ──────  ─────────────────────────────────────
//!   0       6     FF FF FF FF FF FF     (synchronisation stream)
//!   6      96     target MAC × 16       (6 bytes each)
//! ```
//!
//! The NIC does not care how the payload reaches it, so it is normally sent
//! as a UDP broadcast (port 9 by convention).  Sending is best-effort: there
//! is no acknowledgement, so "sent" never means "woken".
//!
//! This module only builds and recognises the bytes.  The UDP transmission
//! lives in the server crate.

use crate::domain::mac::{InvalidAddress, MacAddress, MAC_LEN};

/// Number of times the target MAC is repeated after the sync stream.
pub const MAC_REPETITIONS: usize = 16;

/// Length of the synchronisation stream.
const SYNC_LEN: usize = 6;

/// Total payload length: 6 + 16 × 6.
pub const MAGIC_PACKET_LEN: usize = SYNC_LEN + MAC_REPETITIONS * MAC_LEN;

/// A complete 102-byte Wake-on-LAN payload.
#[derive(Clone, PartialEq, Eq)]
pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    /// Builds the payload for `mac`.
    pub fn for_mac(mac: &MacAddress) -> Self {
        let mut bytes = [0xFFu8; MAGIC_PACKET_LEN];
        let octets = mac.octets();
        for chunk in bytes[SYNC_LEN..].chunks_exact_mut(MAC_LEN) {
            chunk.copy_from_slice(&octets);
        }
        Self(bytes)
    }

    /// The raw bytes to put on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Recognises a received magic packet and returns its target.
    ///
    /// Returns `None` unless the payload is at least 102 bytes, starts with the
    /// sync stream, and carries 16 identical MAC repetitions.  Trailing bytes
    /// (e.g. a SecureOn password) are ignored.
    pub fn target(payload: &[u8]) -> Option<MacAddress> {
        if payload.len() < MAGIC_PACKET_LEN || payload[..SYNC_LEN] != [0xFF; SYNC_LEN] {
            return None;
        }
        let body = &payload[SYNC_LEN..MAGIC_PACKET_LEN];
        let first = &body[..MAC_LEN];
        if !body.chunks_exact(MAC_LEN).all(|chunk| chunk == first) {
            return None;
        }
        let mut octets = [0u8; MAC_LEN];
        octets.copy_from_slice(first);
        Some(MacAddress::new(octets))
    }
}

impl std::fmt::Debug for MagicPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The full 102 bytes are noise in logs; the target says everything.
        match MagicPacket::target(&self.0) {
            Some(mac) => write!(f, "MagicPacket({mac})"),
            None => write!(f, "MagicPacket(<invalid>)"),
        }
    }
}

/// Parses `mac` in any accepted textual form and builds its magic packet.
///
/// # Errors
///
/// Returns [`InvalidAddress`] if `mac` is not a valid MAC address.
///
/// # Example
///
/// ```rust
/// use lanwake_core::protocol::magic_packet::{encode, MAGIC_PACKET_LEN};
///
/// let colon = encode("AA:BB:CC:DD:EE:FF").unwrap();
/// let dash = encode("aa-bb-cc-dd-ee-ff").unwrap();
/// assert_eq!(colon, dash);
/// assert_eq!(colon.as_bytes().len(), MAGIC_PACKET_LEN);
/// ```
pub fn encode(mac: &str) -> Result<MagicPacket, InvalidAddress> {
    Ok(MagicPacket::for_mac(&MacAddress::parse(mac)?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
