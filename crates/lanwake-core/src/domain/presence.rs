//! PresenceTable: the shared MAC → device record store.
//!
//! Every background worker in the server (one passive sniffer per interface,
//! one active scan loop per interface) and every HTTP request handler touches
//! this table.  It is the only long-lived mutable state in the process.
//!
//! # Concurrency model (for beginners)
//!
//! The table is guarded by a `std::sync::RwLock`:
//!
//! - Readers (`get`, `get_all`) take a shared lock, clone what they need, and
//!   release it immediately.  Callers receive owned snapshots, never
//!   references into the table, so a slow HTTP response can never hold the
//!   lock.
//! - Writers (`update`, `seed`) take an exclusive lock and *replace* a whole
//!   [`Device`] value.  Because the new record is fully built before the
//!   lock is taken, a reader can only ever observe the old record or the new
//!   one, never a half-written mix.
//!
//! Sniffer threads are plain OS threads (blocking capture reads), so an async
//! mutex would not help here; every critical section is a handful of map
//! operations.
//!
//! # Closed world
//!
//! By default the key set is fixed by [`PresenceTable::seed`] at startup:
//! observations for MAC addresses that were never configured are dropped.
//! [`UnknownMacPolicy::Admit`] turns that into an open table for deployments
//! that want to see everything on the segment.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::device::Device;
use super::mac::MacAddress;

/// What [`PresenceTable::update`] does with a MAC that was never seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownMacPolicy {
    /// Drop the observation.  The key set stays exactly the configured devices.
    #[default]
    Ignore,
    /// Insert a new record named after its MAC address.
    Admit,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keys in insertion order so listings are stable across calls.
    order: Vec<MacAddress>,
    records: HashMap<MacAddress, Device>,
}

impl Inner {
    fn insert_new(&mut self, device: Device) -> bool {
        if self.records.contains_key(&device.mac) {
            return false;
        }
        self.order.push(device.mac);
        self.records.insert(device.mac, device);
        true
    }
}

/// Concurrent store of device presence records.  Share it as
/// `Arc<PresenceTable>`.
#[derive(Debug, Default)]
pub struct PresenceTable {
    inner: RwLock<Inner>,
    policy: UnknownMacPolicy,
}

impl PresenceTable {
    /// Creates an empty table with the given unknown-MAC policy.
    pub fn new(policy: UnknownMacPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    /// Creates a table and seeds it in one step.
    pub fn with_devices(devices: impl IntoIterator<Item = Device>, policy: UnknownMacPolicy) -> Self {
        let table = Self::new(policy);
        table.seed(devices);
        table
    }

    /// The policy applied to observations of unseeded MACs.
    pub fn policy(&self) -> UnknownMacPolicy {
        self.policy
    }

    /// Replaces the entire table with `devices`.
    ///
    /// Intended for startup.  When the same MAC appears twice, the first
    /// entry wins.
    pub fn seed(&self, devices: impl IntoIterator<Item = Device>) {
        let mut fresh = Inner::default();
        for device in devices {
            let mac = device.mac;
            if !fresh.insert_new(device) {
                debug!("duplicate device {mac} ignored while seeding");
            }
        }
        *self.write() = fresh;
    }

    /// Returns a copy of the record for `mac`, if it is in the table.
    pub fn get(&self, mac: &MacAddress) -> Option<Device> {
        self.read().records.get(mac).cloned()
    }

    /// Returns a point-in-time snapshot of every record, in seed order.
    pub fn get_all(&self) -> Vec<Device> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|mac| inner.records.get(mac).cloned())
            .collect()
    }

    /// `true` if `mac` has a record.
    pub fn contains(&self, mac: &MacAddress) -> bool {
        self.read().records.contains_key(mac)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    /// `true` if the table has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that `mac` answered from `ip` at time `at`.
    ///
    /// The existing record is replaced wholesale (name and MAC carried over).
    /// Returns `true` if a record was written.  For an unseeded MAC this is a
    /// silent no-op under [`UnknownMacPolicy::Ignore`].
    pub fn update(&self, mac: MacAddress, ip: Ipv4Addr, at: DateTime<Utc>) -> bool {
        let mut inner = self.write();

        let replacement = match inner.records.get(&mac) {
            Some(existing) => existing.observed(ip, at),
            None => match self.policy {
                UnknownMacPolicy::Ignore => {
                    trace!("observation for unconfigured {mac} dropped");
                    return false;
                }
                UnknownMacPolicy::Admit => {
                    let device = Device::unseen(mac.to_string(), mac).observed(ip, at);
                    inner.insert_new(device);
                    debug!("IP {ip} is assigned to {mac} as of {at} (admitted)");
                    return true;
                }
            },
        };

        inner.records.insert(mac, replacement);
        debug!("IP {ip} is assigned to {mac} as of {at}");
        true
    }

    // A writer that panicked mid-update could only have panicked before the
    // `insert` that swaps the record in, so the map is still consistent and
    // the poison flag can be ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
