//! # lanwake-core
//!
//! Shared library for lanwake containing the pieces of the presence-and-wake
//! subsystem that do not touch a socket: MAC address parsing, Wake-on-LAN
//! magic packet synthesis, the concurrent presence table, and the hashed
//! challenge protocol used by the stand-alone wake gate.
//!
//! The server crate (`lanwake-server`) wires these into sniffers, probers and
//! listeners.  Everything here can be unit-tested without privileges.
//!
//! # Architecture overview (for beginners)
//!
//! lanwake watches a LAN for a fixed set of configured devices and can wake
//! the sleeping ones.  This crate defines:
//!
//! - **`domain`** – The data the system reasons about: a canonical
//!   [`MacAddress`], the [`Device`] presence record, and the
//!   [`PresenceTable`] every background worker writes into.
//!
//! - **`protocol`** – Bytes that travel over the network.  The 102-byte
//!   [`MagicPacket`] that wakes a machine, and the nonce/digest exchange of
//!   the challenge gate ([`ChallengeSession`]).

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `lanwake_core::PresenceTable` instead of the full module path.
pub use domain::device::Device;
pub use domain::mac::{InvalidAddress, MacAddress};
pub use domain::presence::{PresenceTable, UnknownMacPolicy};
pub use protocol::challenge::{ChallengeError, ChallengeSession, SessionState, Verdict};
pub use protocol::magic_packet::{encode, MagicPacket, MAGIC_PACKET_LEN};
