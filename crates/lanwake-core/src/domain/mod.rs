//! Domain entities for lanwake.
//!
//! This module contains the presence data model with no infrastructure
//! dependencies.  Nothing here opens a socket or spawns a thread; the server
//! crate's sniffers, probers and HTTP handlers all depend on these types, but
//! the types never depend on them.
//!
//! - [`mac`] – the canonical 6-octet hardware address and its parser.
//! - [`device`] – one configured device and what has been observed about it.
//! - [`presence`] – the shared, lock-guarded table of device records.

pub mod device;
pub mod mac;
pub mod presence;
