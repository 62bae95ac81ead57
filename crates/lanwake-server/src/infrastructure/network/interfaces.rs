//! Capture interface selection and probe range derivation.
//!
//! Every sniffer and every scan loop is bound to one link-layer interface.
//! When the config names none, the host default is used: the first interface
//! that is up, not loopback, and carries an IPv4 address.
//!
//! # Probe range
//!
//! The active prober sweeps at most a /24.  Wider networks are narrowed to
//! the /24 containing the interface address; narrower ones are used as-is:
//!
//! ```text
//! 10.1.2.3/16  ──►  10.1.2.1 ..= 10.1.2.254   (minus 10.1.2.3)
//! 10.1.2.3/28  ──►  10.1.2.1 ..= 10.1.2.14    (minus 10.1.2.3)
//! ```
//!
//! Network and broadcast addresses, and the interface's own address, are
//! never probed.

use std::net::{IpAddr, Ipv4Addr};

use ipnet::Ipv4Net;
use lanwake_core::MacAddress;
use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use thiserror::Error;

/// Widest prefix the active prober will sweep.
pub const MIN_SCAN_PREFIX: u8 = 24;

/// Reasons an interface cannot be used for capture or probing.  Each one
/// disables that interface only.
#[derive(Debug, Error)]
pub enum ScanSetupError {
    #[error("no usable network interface found (need one that is up, non-loopback, with IPv4)")]
    NoDefaultInterface,

    #[error("network interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("network interface {0:?} has no IPv4 address")]
    NoIpv4Address(String),

    #[error("network interface {0:?} has no hardware address")]
    NoHardwareAddress(String),

    #[error("invalid prefix /{prefix} on {interface:?}")]
    InvalidPrefix { interface: String, prefix: u8 },

    /// The datalink channel could not be opened (usually missing
    /// `CAP_NET_RAW` or root).
    #[error("failed to open datalink channel on {interface:?}: {source}")]
    Channel {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("datalink channel on {0:?} is not an Ethernet channel")]
    UnsupportedChannel(String),

    #[error("failed to spawn worker thread for {interface:?}: {source}")]
    Spawn {
        interface: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a scan loop needs to know about its interface.
#[derive(Debug, Clone)]
pub struct ScanRange {
    pub interface: NetworkInterface,
    pub address: Ipv4Addr,
    pub hardware: MacAddress,
    pub targets: Vec<Ipv4Addr>,
}

/// Looks up `name`, or the host default when `name` is `None`.
///
/// # Errors
///
/// [`ScanSetupError::InterfaceNotFound`] or
/// [`ScanSetupError::NoDefaultInterface`].
pub fn resolve_interface(name: Option<&str>) -> Result<NetworkInterface, ScanSetupError> {
    let all = datalink::interfaces();
    match name {
        Some(name) => all
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| ScanSetupError::InterfaceNotFound(name.to_string())),
        None => all
            .into_iter()
            .find(|iface| iface.is_up() && !iface.is_loopback() && first_ipv4(iface).is_some())
            .ok_or(ScanSetupError::NoDefaultInterface),
    }
}

/// Derives the probe range for `interface`.
///
/// # Errors
///
/// Fails when the interface lacks an IPv4 address or a hardware address.
pub fn resolve_scan_range(interface: NetworkInterface) -> Result<ScanRange, ScanSetupError> {
    let (address, prefix) =
        first_ipv4(&interface).ok_or_else(|| ScanSetupError::NoIpv4Address(interface.name.clone()))?;
    let hardware = interface
        .mac
        .filter(|mac| *mac != MacAddr::zero())
        .map(from_pnet)
        .ok_or_else(|| ScanSetupError::NoHardwareAddress(interface.name.clone()))?;
    let targets = scan_targets(address, prefix).ok_or_else(|| ScanSetupError::InvalidPrefix {
        interface: interface.name.clone(),
        prefix,
    })?;

    Ok(ScanRange {
        interface,
        address,
        hardware,
        targets,
    })
}

/// Host addresses to probe around `address/prefix`, excluding `address`.
///
/// Returns `None` for a prefix longer than 32.
pub fn scan_targets(address: Ipv4Addr, prefix: u8) -> Option<Vec<Ipv4Addr>> {
    let net = Ipv4Net::new(address, prefix.max(MIN_SCAN_PREFIX)).ok()?;
    Some(net.trunc().hosts().filter(|host| *host != address).collect())
}

fn first_ipv4(interface: &NetworkInterface) -> Option<(Ipv4Addr, u8)> {
    interface.ips.iter().find_map(|net| match net.ip() {
        IpAddr::V4(v4) => Some((v4, net.prefix())),
        IpAddr::V6(_) => None,
    })
}

/// Converts a pnet hardware address to the domain type.
pub fn from_pnet(mac: MacAddr) -> MacAddress {
    let MacAddr(a, b, c, d, e, f) = mac;
    MacAddress::new([a, b, c, d, e, f])
}

/// Converts a domain hardware address to pnet's type.
pub fn to_pnet(mac: MacAddress) -> MacAddr {
    let [a, b, c, d, e, f] = mac.octets();
    MacAddr::new(a, b, c, d, e, f)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
