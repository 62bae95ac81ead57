//! The device presence record.

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mac::MacAddress;

/// One configured device and the most recent observation of it.
///
/// `ip` and `last_seen` stay `None` until a sniffer or prober has seen an ARP
/// reply from the device.  They are always written together: a record with
/// an address but no timestamp (or vice versa) is never produced.
///
/// The JSON shape matches what the HTTP API returns:
///
/// ```json
/// {"name":"nas","mac":"AA:BB:CC:DD:EE:FF","ip":"10.0.0.5","lastSeen":"2024-05-01T10:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Human-readable name from the configuration file.
    pub name: String,
    /// Canonical hardware address; the table key.
    pub mac: MacAddress,
    /// IPv4 address from the most recent ARP reply.
    pub ip: Option<Ipv4Addr>,
    /// When that reply was observed.
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// A configured device that has not been observed yet.
    pub fn unseen(name: impl Into<String>, mac: MacAddress) -> Self {
        Self {
            name: name.into(),
            mac,
            ip: None,
            last_seen: None,
        }
    }

    /// Returns a new record carrying this device's identity and the given
    /// observation.  The original record is left untouched.
    pub fn observed(&self, ip: Ipv4Addr, at: DateTime<Utc>) -> Self {
        Self {
            name: self.name.clone(),
            mac: self.mac,
            ip: Some(ip),
            last_seen: Some(at),
        }
    }

    /// `true` once an address has been recorded for this device.
    pub fn is_seen(&self) -> bool {
        self.ip.is_some()
    }
}
