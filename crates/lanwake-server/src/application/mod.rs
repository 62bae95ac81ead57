//! Application layer use cases for the lanwake server.
//!
//! Use cases in this layer orchestrate `lanwake_core` domain objects and
//! depend only on traits for anything that touches the network, so they can
//! be unit-tested with recording doubles.
//!
//! # Sub-modules
//!
//! - **`wake_device`** – Validates a MAC address, builds its magic packet and
//!   hands it to a [`wake_device::WakeSender`].  Shared by the HTTP `/wake`
//!   route and the challenge gate.
//!
//! - **`scan_presence`** – Drives the active prober: periodic subnet sweeps
//!   with a bounded number of in-flight probes, and on-demand refreshes of a
//!   single device for the HTTP `/update` route.

pub mod scan_presence;
pub mod wake_device;
