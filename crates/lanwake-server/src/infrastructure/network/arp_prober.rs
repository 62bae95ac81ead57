//! Raw-socket ARP prober backing the active scanner.
//!
//! # How it works
//!
//! ```text
//!  probe(ip) ─┬─► register waiter (match ip) ──┐
//!             └─► send ARP request ─► wire     │
//!                                              ▼
//!  reader thread ◄── wire: ARP reply ──► dispatch to matching waiters
//!                                              │
//!  probe(ip) ◄──────────── oneshot ◄───────────┘   (or timeout → None)
//! ```
//!
//! One Layer 2 datalink channel is opened per interface.  The sending half is
//! shared behind a mutex; the receiving half is owned by a dedicated OS
//! thread that parses every frame and hands ARP replies to whichever probes
//! are waiting for them.  Waiters match either on the sender IPv4 address
//! (subnet sweep) or on the sender hardware address (on-demand refresh of a
//! single device).

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use lanwake_core::MacAddress;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::MutablePacket;
use pnet::util::MacAddr;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace};

use super::interfaces::{to_pnet, ScanRange, ScanSetupError};
use super::sniffer::{is_timeout_error, parse_arp_reply, FrameKind, READ_TIMEOUT};
use crate::application::scan_presence::{ArpProber, ArpReply, ProbeError};

/// Ethernet header (14) + ARP body (28).
pub const ARP_FRAME_LEN: usize = 42;

/// What a waiting probe wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    Ip(Ipv4Addr),
    Mac(MacAddress),
}

impl Match {
    fn accepts(&self, reply: &ArpReply) -> bool {
        match self {
            Match::Ip(ip) => reply.ip == *ip,
            Match::Mac(mac) => reply.mac == *mac,
        }
    }
}

struct Waiter {
    id: u64,
    matcher: Match,
    reply: oneshot::Sender<ArpReply>,
}

/// Probes currently waiting for a reply.
#[derive(Default)]
struct Waiters {
    next_id: u64,
    pending: Vec<Waiter>,
}

impl Waiters {
    fn register(&mut self, matcher: Match) -> (u64, oneshot::Receiver<ArpReply>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.push(Waiter {
            id,
            matcher,
            reply: tx,
        });
        (id, rx)
    }

    fn cancel(&mut self, id: u64) {
        self.pending.retain(|w| w.id != id);
    }

    /// Completes every waiter that accepts `reply`; returns how many.
    fn dispatch(&mut self, reply: ArpReply) -> usize {
        let mut delivered = 0;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].matcher.accepts(&reply) {
                let waiter = self.pending.swap_remove(i);
                if waiter.reply.send(reply).is_ok() {
                    delivered += 1;
                }
            } else {
                i += 1;
            }
        }
        delivered
    }
}

type SharedWaiters = Arc<Mutex<Waiters>>;
type SharedSender = Arc<Mutex<Box<dyn DataLinkSender>>>;

fn lock(waiters: &Mutex<Waiters>) -> std::sync::MutexGuard<'_, Waiters> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a complete Ethernet + ARP request frame.
///
/// `destination` is the Ethernet destination: broadcast for a sweep, or the
/// device's own address for a directed refresh.
pub fn build_arp_request(
    source_mac: MacAddress,
    source_ip: Ipv4Addr,
    destination: MacAddress,
    target_ip: Ipv4Addr,
) -> [u8; ARP_FRAME_LEN] {
    let mut buffer = [0u8; ARP_FRAME_LEN];
    // Both packet views fit: the buffer is sized for exactly these headers.
    if let Some(mut eth) = MutableEthernetPacket::new(&mut buffer) {
        eth.set_destination(to_pnet(destination));
        eth.set_source(to_pnet(source_mac));
        eth.set_ethertype(EtherTypes::Arp);

        if let Some(mut arp) = MutableArpPacket::new(eth.payload_mut()) {
            arp.set_hardware_type(ArpHardwareTypes::Ethernet);
            arp.set_protocol_type(EtherTypes::Ipv4);
            arp.set_hw_addr_len(6);
            arp.set_proto_addr_len(4);
            arp.set_operation(ArpOperations::Request);
            arp.set_sender_hw_addr(to_pnet(source_mac));
            arp.set_sender_proto_addr(source_ip);
            arp.set_target_hw_addr(MacAddr::zero());
            arp.set_target_proto_addr(target_ip);
        }
    }
    buffer
}

/// [`ArpProber`] over a pnet Layer 2 channel.
pub struct PnetArpProber {
    interface: String,
    source_mac: MacAddress,
    source_ip: Ipv4Addr,
    tx: SharedSender,
    waiters: SharedWaiters,
    reader_alive: Arc<AtomicBool>,
}

impl PnetArpProber {
    /// Opens a channel on `range.interface` and starts its reply reader.
    ///
    /// The reader exits when `running` is cleared.
    ///
    /// # Errors
    ///
    /// Fails if the channel cannot be opened (usually missing privileges) or
    /// the reader thread cannot be spawned.
    pub fn open(
        range: &ScanRange,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, JoinHandle<()>), ScanSetupError> {
        let interface = range.interface.name.clone();
        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        let (tx, rx) = match datalink::channel(&range.interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err(ScanSetupError::UnsupportedChannel(interface)),
            Err(source) => return Err(ScanSetupError::Channel { interface, source }),
        };

        let waiters = SharedWaiters::default();
        let reader_alive = Arc::new(AtomicBool::new(true));

        let handle = {
            let waiters = Arc::clone(&waiters);
            let alive = Arc::clone(&reader_alive);
            let name = interface.clone();
            std::thread::Builder::new()
                .name(format!("lanwake-arp-{name}"))
                .spawn(move || reply_reader(rx, &name, &waiters, &alive, &running))
                .map_err(|source| ScanSetupError::Spawn {
                    interface: interface.clone(),
                    source,
                })?
        };

        info!(%interface, address = %range.address, "ARP prober ready");
        let prober = Self {
            interface,
            source_mac: range.hardware,
            source_ip: range.address,
            tx: Arc::new(Mutex::new(tx)),
            waiters,
            reader_alive,
        };
        Ok((prober, handle))
    }

    /// Sends one request per target.  pnet's sender blocks on the socket, so
    /// the batch runs on the blocking pool rather than a runtime worker.
    async fn send_requests(
        &self,
        destination: MacAddress,
        targets: &[Ipv4Addr],
    ) -> Result<usize, ProbeError> {
        let frames: Vec<_> = targets
            .iter()
            .map(|&target| {
                let frame = build_arp_request(self.source_mac, self.source_ip, destination, target);
                (target, frame)
            })
            .collect();
        let tx = Arc::clone(&self.tx);
        let interface = self.interface.clone();
        let first = targets.first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED);

        tokio::task::spawn_blocking(move || send_frames(&tx, &interface, &frames))
            .await
            .map_err(|e| ProbeError::Send {
                target: first,
                reason: format!("send task failed: {e}"),
            })?
    }

    async fn await_reply(
        &self,
        id: u64,
        rx: oneshot::Receiver<ArpReply>,
        timeout: Duration,
    ) -> Result<Option<ArpReply>, ProbeError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(ProbeError::ReaderStopped),
            Err(_) => {
                lock(&self.waiters).cancel(id);
                Ok(None)
            }
        }
    }

    fn ensure_reader(&self) -> Result<(), ProbeError> {
        if self.reader_alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ProbeError::ReaderStopped)
        }
    }
}

#[async_trait]
impl ArpProber for PnetArpProber {
    async fn probe(
        &self,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Option<ArpReply>, ProbeError> {
        self.ensure_reader()?;
        let (id, rx) = lock(&self.waiters).register(Match::Ip(target));

        if let Err(e) = self.send_requests(MacAddress::BROADCAST, &[target]).await {
            lock(&self.waiters).cancel(id);
            return Err(e);
        }
        self.await_reply(id, rx, timeout).await
    }

    async fn probe_mac(
        &self,
        mac: MacAddress,
        targets: &[Ipv4Addr],
        timeout: Duration,
    ) -> Result<Option<ArpReply>, ProbeError> {
        self.ensure_reader()?;
        let (id, rx) = lock(&self.waiters).register(Match::Mac(mac));

        let sent = match self.send_requests(mac, targets).await {
            Ok(sent) => sent,
            Err(e) => {
                lock(&self.waiters).cancel(id);
                return Err(e);
            }
        };
        trace!(%mac, sent, "directed ARP requests sent");
        self.await_reply(id, rx, timeout).await
    }
}

/// Writes `frames` in order.  Fails only if none could be sent.
fn send_frames(
    tx: &Mutex<Box<dyn DataLinkSender>>,
    interface: &str,
    frames: &[(Ipv4Addr, [u8; ARP_FRAME_LEN])],
) -> Result<usize, ProbeError> {
    let mut tx = tx.lock().unwrap_or_else(PoisonError::into_inner);
    let mut sent = 0usize;
    let mut last_error = None;
    for (target, frame) in frames {
        match tx.send_to(frame, None) {
            Some(Ok(())) => sent += 1,
            Some(Err(e)) => {
                last_error = Some(ProbeError::Send {
                    target: *target,
                    reason: e.to_string(),
                })
            }
            None => {
                last_error = Some(ProbeError::Send {
                    target: *target,
                    reason: format!("{interface}: no packet sent"),
                })
            }
        }
    }
    match last_error {
        Some(e) if sent == 0 => Err(e),
        _ => Ok(sent),
    }
}

/// Reader thread body: dispatches replies until shutdown or a hard error.
fn reply_reader(
    mut rx: Box<dyn DataLinkReceiver>,
    interface: &str,
    waiters: &Mutex<Waiters>,
    alive: &AtomicBool,
    running: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        let frame = match rx.next() {
            Ok(frame) => frame,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!(%interface, "ARP reply reader failed: {e}");
                break;
            }
        };
        if let Some(reply) = parse_arp_reply(frame, FrameKind::Ethernet) {
            let delivered = lock(waiters).dispatch(reply);
            if delivered > 0 {
                debug!(mac = %reply.mac, ip = %reply.ip, delivered, "ARP reply matched");
            }
        }
    }

    alive.store(false, Ordering::Relaxed);
    // Dropping the senders wakes every waiting probe with ReaderStopped.
    lock(waiters).pending.clear();
    info!(%interface, "ARP reply reader stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
