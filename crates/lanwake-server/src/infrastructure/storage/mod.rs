//! Storage infrastructure: configuration file loading.
//!
//! lanwake keeps no state on disk; all presence data lives in memory and is
//! rebuilt from the device list in the config file on every start.

pub mod config;
