//! Protocol module containing the Wake-on-LAN payload and the challenge gate.

pub mod challenge;
pub mod magic_packet;

pub use challenge::{ChallengeError, ChallengeSession, SessionState, Verdict};
pub use magic_packet::{encode, MagicPacket, MAGIC_PACKET_LEN};
