//! Infrastructure layer for the lanwake server.
//!
//! Contains OS-facing adapters: raw link-layer capture and ARP probing, the
//! UDP Wake-on-LAN sender, the challenge gate listener, the HTTP API, config
//! file loading, and the supervisor that owns every background worker.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanwake_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod http;
pub mod network;
pub mod storage;
pub mod supervisor;
