//! Passive ARP sniffer: one OS thread per interface.
//!
//! Devices announce themselves constantly: every ARP reply on the segment
//! carries a (hardware address, IPv4 address) pair.  The sniffer reads those
//! replies off the wire and writes them into the [`PresenceTable`] without
//! sending a single byte.
//!
//! # Capture paths
//!
//! - **Filtered** (Linux): the packet socket is opened for the ARP ethertype
//!   only, so the kernel drops everything else before it reaches us.  Frames
//!   arrive without their Ethernet header.
//! - **Unfiltered** (other platforms, or when the filtered socket cannot be
//!   opened): every Ethernet frame on the interface is read and filtered
//!   here.  That costs CPU on a busy segment and may drop replies under load,
//!   so a warning is logged once per process.
//!
//! In both cases only opcode 2 (reply) is recorded; requests, gratuitous
//! announcements with an unspecified sender and non-ARP frames are ignored.
//!
//! # Read timeout
//!
//! The channel is opened with a short read timeout.  On each timeout the loop
//! checks the `running` flag and exits cleanly once it is cleared.  Any other
//! read error ends the thread; it is logged and not retried.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use lanwake_core::PresenceTable;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::Packet;
use thiserror::Error;
use tracing::{error, info, trace, warn};

use super::interfaces::{from_pnet, ScanSetupError};
use crate::application::scan_presence::ArpReply;

/// How long a single capture read may block before the shutdown flag is
/// checked again.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

static UNFILTERED_WARNING: Once = Once::new();

/// Framing of the bytes a capture source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Full Ethernet frames (unfiltered capture).
    Ethernet,
    /// Bare ARP packets with no link-layer header (filtered capture).
    Arp,
}

/// A capture read failed for a reason other than a timeout.
#[derive(Debug, Error)]
#[error("capture on {interface:?} failed: {source}")]
pub struct CaptureError {
    pub interface: String,
    #[source]
    pub source: io::Error,
}

/// Anything that yields captured frames.
///
/// Implemented by [`PnetFrameSource`]; tests use a scripted double.
pub trait FrameSource: Send {
    /// Blocks for the next frame, or returns a timeout error after at most
    /// [`READ_TIMEOUT`].
    fn next_frame(&mut self) -> io::Result<&[u8]>;

    fn kind(&self) -> FrameKind;

    fn interface(&self) -> &str;
}

/// A pnet datalink receiver.
pub struct PnetFrameSource {
    interface: String,
    rx: Box<dyn DataLinkReceiver>,
    kind: FrameKind,
}

impl FrameSource for PnetFrameSource {
    fn next_frame(&mut self) -> io::Result<&[u8]> {
        self.rx.next()
    }

    fn kind(&self) -> FrameKind {
        self.kind
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}

/// Opens a capture channel on `interface`, preferring the filtered path.
///
/// # Errors
///
/// Returns [`ScanSetupError::Channel`] if neither path can be opened.
pub fn open_capture(interface: &NetworkInterface) -> Result<PnetFrameSource, ScanSetupError> {
    #[cfg(target_os = "linux")]
    {
        const ETH_P_ARP: u16 = 0x0806;
        let filtered = Config {
            channel_type: datalink::ChannelType::Layer3(ETH_P_ARP),
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        match datalink::channel(interface, filtered) {
            Ok(Channel::Ethernet(_tx, rx)) => {
                info!(interface = %interface.name, "ARP capture using kernel ethertype filter");
                return Ok(PnetFrameSource {
                    interface: interface.name.clone(),
                    rx,
                    kind: FrameKind::Arp,
                });
            }
            Ok(_) => warn_unfiltered(&interface.name, "unexpected channel type"),
            Err(e) => warn_unfiltered(&interface.name, &e.to_string()),
        }
    }
    #[cfg(not(target_os = "linux"))]
    warn_unfiltered(&interface.name, "no kernel ARP filter on this platform");

    let unfiltered = Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
    };
    match datalink::channel(interface, unfiltered) {
        Ok(Channel::Ethernet(_tx, rx)) => Ok(PnetFrameSource {
            interface: interface.name.clone(),
            rx,
            kind: FrameKind::Ethernet,
        }),
        Ok(_) => Err(ScanSetupError::UnsupportedChannel(interface.name.clone())),
        Err(source) => Err(ScanSetupError::Channel {
            interface: interface.name.clone(),
            source,
        }),
    }
}

fn warn_unfiltered(interface: &str, reason: &str) {
    UNFILTERED_WARNING.call_once(|| {
        warn!(
            interface,
            reason,
            "falling back to unfiltered capture; every frame is inspected in user space, \
             which is slower and may miss ARP replies on a busy network"
        );
    });
}

/// Extracts the sender of an ARP reply, or `None` for anything else.
pub fn parse_arp_reply(frame: &[u8], kind: FrameKind) -> Option<ArpReply> {
    match kind {
        FrameKind::Ethernet => {
            let eth = EthernetPacket::new(frame)?;
            if eth.get_ethertype() != EtherTypes::Arp {
                return None;
            }
            reply_sender(&ArpPacket::new(eth.payload())?)
        }
        FrameKind::Arp => reply_sender(&ArpPacket::new(frame)?),
    }
}

fn reply_sender(arp: &ArpPacket<'_>) -> Option<ArpReply> {
    if arp.get_operation() != ArpOperations::Reply
        || arp.get_hardware_type() != ArpHardwareTypes::Ethernet
        || arp.get_protocol_type() != EtherTypes::Ipv4
        || arp.get_hw_addr_len() != 6
        || arp.get_proto_addr_len() != 4
    {
        return None;
    }
    let ip = arp.get_sender_proto_addr();
    if ip == Ipv4Addr::UNSPECIFIED {
        return None;
    }
    Some(ArpReply {
        mac: from_pnet(arp.get_sender_hw_addr()),
        ip,
    })
}

/// Reads frames from `source` until `running` is cleared.
///
/// Returns the number of table records written.
///
/// # Errors
///
/// Returns [`CaptureError`] on the first read failure that is not a timeout.
pub fn run_capture_loop(
    source: &mut dyn FrameSource,
    table: &PresenceTable,
    running: &AtomicBool,
) -> Result<u64, CaptureError> {
    let kind = source.kind();
    let interface = source.interface().to_string();
    let mut recorded = 0u64;

    while running.load(Ordering::Relaxed) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) if is_timeout_error(&e) => continue,
            Err(source) => return Err(CaptureError { interface, source }),
        };

        if let Some(reply) = parse_arp_reply(frame, kind) {
            trace!(mac = %reply.mac, ip = %reply.ip, "ARP reply observed");
            if table.update(reply.mac, reply.ip, Utc::now()) {
                recorded += 1;
            }
        }
    }

    Ok(recorded)
}

/// Spawns a sniffer thread on `interface`.
///
/// # Errors
///
/// Fails if no capture channel can be opened or the thread cannot be spawned.
pub fn spawn_sniffer(
    interface: &NetworkInterface,
    table: Arc<PresenceTable>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, ScanSetupError> {
    let mut source = open_capture(interface)?;
    let name = interface.name.clone();

    std::thread::Builder::new()
        .name(format!("lanwake-sniff-{name}"))
        .spawn(move || {
            info!(interface = %name, "passive sniffer started");
            match run_capture_loop(&mut source, &table, &running) {
                Ok(recorded) => info!(interface = %name, recorded, "passive sniffer stopped"),
                Err(e) => error!("{e}; passive sniffer stopped"),
            }
        })
        .map_err(|source| ScanSetupError::Spawn {
            interface: interface.name.clone(),
            source,
        })
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
pub(crate) fn is_timeout_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::interfaces::to_pnet;
    use lanwake_core::{Device, MacAddress, UnknownMacPolicy};
    use pnet::packet::arp::{ArpOperation, MutableArpPacket};
    use pnet::packet::ethernet::{EtherType, MutableEthernetPacket};
    use pnet::util::MacAddr;
    use std::collections::VecDeque;

    const FOO: MacAddress = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    const ARP_LEN: usize = 28;
    const ETH_HEADER_LEN: usize = 14;

    // ── Frame builders ────────────────────────────────────────────────────────

    fn arp_bytes(op: ArpOperation, sender: MacAddress, ip: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; ARP_LEN];
        let mut arp = MutableArpPacket::new(&mut buf).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(op);
        arp.set_sender_hw_addr(to_pnet(sender));
        arp.set_sender_proto_addr(ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(Ipv4Addr::new(10, 0, 0, 1));
        buf
    }

    fn ethernet_frame(ethertype: EtherType, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; ETH_HEADER_LEN + payload.len()];
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(to_pnet(FOO));
        eth.set_ethertype(ethertype);
        eth.set_payload(payload);
        buf
    }

    fn reply_frame(ip: Ipv4Addr) -> Vec<u8> {
        ethernet_frame(EtherTypes::Arp, &arp_bytes(ArpOperations::Reply, FOO, ip))
    }

    // ── parse_arp_reply ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_reply_from_ethernet_frame() {
        // Arrange
        let frame = reply_frame(Ipv4Addr::new(10, 0, 0, 5));

        // Act
        let reply = parse_arp_reply(&frame, FrameKind::Ethernet);

        // Assert
        assert_eq!(
            reply,
            Some(ArpReply {
                mac: FOO,
                ip: Ipv4Addr::new(10, 0, 0, 5)
            })
        );
    }

    #[test]
    fn test_parse_reply_from_bare_arp_packet() {
        let packet = arp_bytes(ArpOperations::Reply, FOO, Ipv4Addr::new(10, 0, 0, 6));
        let reply = parse_arp_reply(&packet, FrameKind::Arp).unwrap();
        assert_eq!(reply.ip, Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn test_parse_ignores_requests() {
        let frame = ethernet_frame(
            EtherTypes::Arp,
            &arp_bytes(ArpOperations::Request, FOO, Ipv4Addr::new(10, 0, 0, 5)),
        );
        assert_eq!(parse_arp_reply(&frame, FrameKind::Ethernet), None);
    }

    #[test]
    fn test_parse_ignores_non_arp_frames() {
        let payload = arp_bytes(ArpOperations::Reply, FOO, Ipv4Addr::new(10, 0, 0, 5));
        let frame = ethernet_frame(EtherTypes::Ipv4, &payload);
        assert_eq!(parse_arp_reply(&frame, FrameKind::Ethernet), None);
    }

    #[test]
    fn test_parse_ignores_truncated_frames() {
        let frame = reply_frame(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(parse_arp_reply(&frame[..30], FrameKind::Ethernet), None);
        assert_eq!(parse_arp_reply(&[], FrameKind::Arp), None);
    }

    #[test]
    fn test_parse_ignores_unspecified_sender() {
        let frame = reply_frame(Ipv4Addr::UNSPECIFIED);
        assert_eq!(parse_arp_reply(&frame, FrameKind::Ethernet), None);
    }

    // ── run_capture_loop ──────────────────────────────────────────────────────

    /// Replays a script of reads, then clears `running`.
    struct ScriptedSource {
        script: VecDeque<io::Result<Vec<u8>>>,
        current: Vec<u8>,
        running: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(script: Vec<io::Result<Vec<u8>>>, running: Arc<AtomicBool>) -> Self {
            Self {
                script: script.into(),
                current: Vec::new(),
                running,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> io::Result<&[u8]> {
            match self.script.pop_front() {
                Some(Ok(frame)) => {
                    self.current = frame;
                    Ok(&self.current)
                }
                Some(Err(e)) => Err(e),
                None => {
                    self.running.store(false, Ordering::Relaxed);
                    Err(io::Error::new(io::ErrorKind::TimedOut, "script exhausted"))
                }
            }
        }

        fn kind(&self) -> FrameKind {
            FrameKind::Ethernet
        }

        fn interface(&self) -> &str {
            "test0"
        }
    }

    fn table() -> PresenceTable {
        PresenceTable::with_devices([Device::unseen("foo", FOO)], UnknownMacPolicy::Ignore)
    }

    #[test]
    fn test_capture_loop_records_replies_and_skips_timeouts() {
        // Arrange
        let running = Arc::new(AtomicBool::new(true));
        let mut source = ScriptedSource::new(
            vec![
                Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
                Ok(reply_frame(Ipv4Addr::new(10, 0, 0, 5))),
                Ok(ethernet_frame(EtherTypes::Ipv4, &[0u8; 40])),
            ],
            running.clone(),
        );
        let table = table();

        // Act
        let recorded = run_capture_loop(&mut source, &table, &running).unwrap();

        // Assert
        assert_eq!(recorded, 1);
        assert_eq!(table.get(&FOO).unwrap().ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_capture_loop_ignores_unknown_senders() {
        let running = Arc::new(AtomicBool::new(true));
        let stranger = MacAddress::new([2, 0, 0, 0, 0, 9]);
        let frame = ethernet_frame(
            EtherTypes::Arp,
            &arp_bytes(ArpOperations::Reply, stranger, Ipv4Addr::new(10, 0, 0, 9)),
        );
        let mut source = ScriptedSource::new(vec![Ok(frame)], running.clone());
        let table = table();

        let recorded = run_capture_loop(&mut source, &table, &running).unwrap();

        assert_eq!(recorded, 0);
        assert_eq!(table.len(), 1);
        assert!(!table.get(&FOO).unwrap().is_seen());
    }

    #[test]
    fn test_capture_loop_stops_on_hard_error() {
        let running = Arc::new(AtomicBool::new(true));
        let mut source = ScriptedSource::new(
            vec![
                Err(io::Error::new(io::ErrorKind::Other, "interface went away")),
                Ok(reply_frame(Ipv4Addr::new(10, 0, 0, 5))),
            ],
            running.clone(),
        );
        let table = table();

        let err = run_capture_loop(&mut source, &table, &running).unwrap_err();

        assert_eq!(err.interface, "test0");
        assert!(!table.get(&FOO).unwrap().is_seen(), "frames after the error are not read");
        assert!(running.load(Ordering::Relaxed), "a capture failure does not stop the process");
    }

    #[test]
    fn test_capture_loop_exits_immediately_when_not_running() {
        let running = Arc::new(AtomicBool::new(false));
        let mut source =
            ScriptedSource::new(vec![Ok(reply_frame(Ipv4Addr::new(10, 0, 0, 5)))], running.clone());

        assert_eq!(run_capture_loop(&mut source, &table(), &running).unwrap(), 0);
    }

    #[test]
    fn test_is_timeout_error_classifies_kinds() {
        assert!(is_timeout_error(&io::Error::new(io::ErrorKind::TimedOut, "t")));
        assert!(is_timeout_error(&io::Error::new(io::ErrorKind::WouldBlock, "w")));
        assert!(!is_timeout_error(&io::Error::new(io::ErrorKind::ConnectionReset, "r")));
    }
}
