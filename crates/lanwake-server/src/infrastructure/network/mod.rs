//! Network infrastructure for the lanwake server.
//!
//! # Sub-modules
//!
//! - **`wol_sender`** – Broadcasts magic packets over UDP from an ephemeral
//!   socket.
//!
//! - **`interfaces`** – Picks capture interfaces and derives the address range
//!   each active prober sweeps.
//!
//! - **`sniffer`** – One OS thread per interface reading ARP replies off the
//!   wire and writing them into the presence table.
//!
//! - **`arp_prober`** – Crafts ARP requests and matches replies to waiting
//!   probes.  Implements [`crate::application::scan_presence::ArpProber`].
//!
//! - **`challenge_server`** – The stand-alone TCP wake gate: nonce out,
//!   digest in, decoy token out.

pub mod arp_prober;
pub mod challenge_server;
pub mod interfaces;
pub mod sniffer;
pub mod wol_sender;
