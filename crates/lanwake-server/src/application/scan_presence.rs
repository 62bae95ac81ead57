//! ScanPresenceUseCase: the active half of presence tracking.
//!
//! Passive sniffing only sees devices that happen to talk.  This use case
//! asks instead: every cycle it sends an ARP request to each address of the
//! interface's subnet and records whoever answers in the [`PresenceTable`].
//!
//! # Cycle shape
//!
//! ```text
//! targets ──► buffer_unordered(concurrency) ──► probe(ip, timeout)
//!                                                 │
//!                  Ok(Some(reply)) ───────────────┼──► table.update(mac, ip, now)
//!                  Ok(None)  (no answer) ─────────┤
//!                  Err(e)    (counted, logged) ───┘
//! ```
//!
//! A single failing probe never aborts a cycle, and a failing cycle never
//! stops [`run_scan_loop`].  The loop only ends when the shared `running`
//! flag is cleared.
//!
//! The prober itself is behind the [`ArpProber`] trait so cycles can be
//! tested without raw sockets.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use lanwake_core::{Device, MacAddress, PresenceTable};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest single sleep before the shutdown flag is checked again.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// An ARP reply: who answered, from which address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpReply {
    pub mac: MacAddress,
    pub ip: Ipv4Addr,
}

/// Failure of a single probe.  Never fatal to a cycle.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The request frame could not be built or transmitted.
    #[error("failed to send ARP request for {target}: {reason}")]
    Send { target: Ipv4Addr, reason: String },

    /// The reply reader has stopped; no answers can be delivered any more.
    #[error("ARP reply reader is no longer running")]
    ReaderStopped,
}

/// Sends ARP requests and waits for matching replies.
///
/// A timeout is reported as `Ok(None)`, not as an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArpProber: Send + Sync {
    /// Broadcasts a request for `target` and waits up to `timeout` for its
    /// reply.
    async fn probe(&self, target: Ipv4Addr, timeout: Duration)
        -> Result<Option<ArpReply>, ProbeError>;

    /// Sends requests for every address in `targets`, each addressed at the
    /// link layer to `mac`, and returns the first reply whose sender is `mac`.
    async fn probe_mac(
        &self,
        mac: MacAddress,
        targets: &[Ipv4Addr],
        timeout: Duration,
    ) -> Result<Option<ArpReply>, ProbeError>;
}

/// Error type for on-demand refreshes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// The MAC is not in the presence table.
    #[error("{0} is not a configured device")]
    UnknownDevice(MacAddress),
}

/// Counters for one sweep of the subnet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Probes started (one per target address).
    pub probed: usize,
    /// Probes that received a reply.
    pub answered: usize,
    /// Replies that changed a table record.
    pub recorded: usize,
    /// Probes that failed outright.
    pub failed: usize,
}

/// Active scanner for one interface.
pub struct ScanPresenceUseCase {
    table: Arc<PresenceTable>,
    prober: Arc<dyn ArpProber>,
    targets: Vec<Ipv4Addr>,
    concurrency: usize,
    probe_timeout: Duration,
}

impl ScanPresenceUseCase {
    /// Creates a scanner.  `concurrency` is clamped to at least one worker.
    pub fn new(
        table: Arc<PresenceTable>,
        prober: Arc<dyn ArpProber>,
        targets: Vec<Ipv4Addr>,
        concurrency: usize,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            table,
            prober,
            targets,
            concurrency: concurrency.max(1),
            probe_timeout,
        }
    }

    /// Addresses probed each cycle.
    pub fn targets(&self) -> &[Ipv4Addr] {
        &self.targets
    }

    /// Probes every target once and records the replies.
    pub async fn run_cycle(&self) -> CycleReport {
        let prober = &self.prober;
        let timeout = self.probe_timeout;

        let mut outcomes = stream::iter(self.targets.iter().copied())
            .map(|target| async move { (target, prober.probe(target, timeout).await) })
            .buffer_unordered(self.concurrency);

        let mut report = CycleReport::default();
        while let Some((target, outcome)) = outcomes.next().await {
            report.probed += 1;
            match outcome {
                Ok(Some(reply)) => {
                    report.answered += 1;
                    if self.record(reply) {
                        report.recorded += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    debug!(%target, "probe failed: {e}");
                }
            }
        }

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                probed = report.probed,
                "scan cycle finished with probe failures"
            );
        } else {
            debug!(
                probed = report.probed,
                answered = report.answered,
                recorded = report.recorded,
                "scan cycle finished"
            );
        }
        report
    }

    /// Probes one device immediately and returns its (possibly unchanged)
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::UnknownDevice`] if `mac` is not in the table.
    pub async fn refresh_device(&self, mac: MacAddress) -> Result<Device, RefreshError> {
        if !self.table.contains(&mac) {
            return Err(RefreshError::UnknownDevice(mac));
        }

        match self.prober.probe_mac(mac, &self.targets, self.probe_timeout).await {
            Ok(Some(reply)) => {
                self.record(reply);
            }
            Ok(None) => debug!(%mac, "no reply to on-demand probe"),
            Err(e) => warn!(%mac, "on-demand probe failed: {e}"),
        }

        self.table.get(&mac).ok_or(RefreshError::UnknownDevice(mac))
    }

    /// Refreshes every device in the table, `concurrency` at a time, and
    /// returns the table snapshot afterwards.
    pub async fn refresh_all(&self) -> Vec<Device> {
        let macs: Vec<MacAddress> = self.table.get_all().into_iter().map(|d| d.mac).collect();

        stream::iter(macs)
            .map(|mac| self.refresh_device(mac))
            .buffer_unordered(self.concurrency)
            .for_each(|_| async {})
            .await;

        self.table.get_all()
    }

    fn record(&self, reply: ArpReply) -> bool {
        self.table.update(reply.mac, reply.ip, Utc::now())
    }
}

/// Runs `use_case` every `interval` until `running` is cleared.
///
/// The flag is checked between cycles and while sleeping, so shutdown takes
/// at most one in-flight cycle plus a short sleep slice.
pub async fn run_scan_loop(
    use_case: Arc<ScanPresenceUseCase>,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    info!(
        targets = use_case.targets().len(),
        interval_secs = interval.as_secs(),
        "scan loop started"
    );

    while running.load(Ordering::Relaxed) {
        use_case.run_cycle().await;
        sleep_while_running(&running, interval).await;
    }

    info!("scan loop stopped");
}

/// Sleeps for `total`, waking every [`SLEEP_SLICE`] to return early once
/// `running` is cleared.
async fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = tokio::time::Instant::now() + total;
    while running.load(Ordering::Relaxed) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep((deadline - now).min(SLEEP_SLICE)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanwake_core::UnknownMacPolicy;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const FOO: MacAddress = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    const BAR: MacAddress = MacAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const STRANGER: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 1]);

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// Answers from a fixed ip → mac map; everything else times out.
    #[derive(Default)]
    struct ScriptedProber {
        hosts: HashMap<Ipv4Addr, MacAddress>,
        failing: Vec<Ipv4Addr>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        probe_mac_calls: Mutex<Vec<MacAddress>>,
    }

    #[async_trait]
    impl ArpProber for ScriptedProber {
        async fn probe(
            &self,
            target: Ipv4Addr,
            _timeout: Duration,
        ) -> Result<Option<ArpReply>, ProbeError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&target) {
                return Err(ProbeError::Send {
                    target,
                    reason: "injected failure".to_string(),
                });
            }
            Ok(self.hosts.get(&target).map(|&mac| ArpReply { mac, ip: target }))
        }

        async fn probe_mac(
            &self,
            mac: MacAddress,
            targets: &[Ipv4Addr],
            _timeout: Duration,
        ) -> Result<Option<ArpReply>, ProbeError> {
            self.probe_mac_calls.lock().unwrap().push(mac);
            Ok(targets
                .iter()
                .find(|ip| self.hosts.get(ip) == Some(&mac))
                .map(|&ip| ArpReply { mac, ip }))
        }
    }

    fn table() -> Arc<PresenceTable> {
        Arc::new(PresenceTable::with_devices(
            [Device::unseen("foo", FOO), Device::unseen("bar", BAR)],
            UnknownMacPolicy::Ignore,
        ))
    }

    fn targets() -> Vec<Ipv4Addr> {
        (1..=20).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect()
    }

    fn use_case(table: Arc<PresenceTable>, prober: Arc<dyn ArpProber>) -> ScanPresenceUseCase {
        ScanPresenceUseCase::new(table, prober, targets(), 4, Duration::from_millis(50))
    }

    // ── run_cycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cycle_records_replies_from_known_devices() {
        // Arrange
        let table = table();
        let prober = ScriptedProber {
            hosts: HashMap::from([
                (Ipv4Addr::new(10, 0, 0, 5), FOO),
                (Ipv4Addr::new(10, 0, 0, 9), STRANGER),
            ]),
            ..Default::default()
        };
        let scanner = use_case(table.clone(), Arc::new(prober));

        // Act
        let report = scanner.run_cycle().await;

        // Assert
        assert_eq!(report.probed, 20);
        assert_eq!(report.answered, 2);
        assert_eq!(report.recorded, 1, "stranger is ignored in closed-world mode");
        assert_eq!(table.get(&FOO).unwrap().ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!table.get(&BAR).unwrap().is_seen());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_continues_past_failing_probes() {
        let table = table();
        let prober = ScriptedProber {
            hosts: HashMap::from([(Ipv4Addr::new(10, 0, 0, 20), BAR)]),
            failing: vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
            ..Default::default()
        };
        let scanner = use_case(table.clone(), Arc::new(prober));

        let report = scanner.run_cycle().await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.probed, 20);
        assert!(table.get(&BAR).unwrap().is_seen());
    }

    #[tokio::test]
    async fn test_cycle_respects_concurrency_bound() {
        let prober = Arc::new(ScriptedProber::default());
        let scanner = use_case(table(), prober.clone());

        scanner.run_cycle().await;

        let peak = prober.peak_in_flight.load(Ordering::SeqCst);
        assert!((1..=4).contains(&peak), "peak in-flight probes was {peak}");
    }

    #[tokio::test]
    async fn test_all_timeouts_leave_table_unchanged() {
        // Arrange: the mock answers nothing.
        let mut mock = MockArpProber::new();
        mock.expect_probe().times(20).returning(|_, _| Ok(None));
        let table = table();
        let before = table.get_all();
        let scanner = use_case(table.clone(), Arc::new(mock));

        // Act
        let report = scanner.run_cycle().await;

        // Assert
        assert_eq!(report.answered, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(table.get_all(), before);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let scanner = ScanPresenceUseCase::new(
            table(),
            Arc::new(ScriptedProber::default()),
            targets(),
            0,
            Duration::from_millis(1),
        );
        assert_eq!(scanner.concurrency, 1);
    }

    // ── refresh_device / refresh_all ──────────────────────────────────────────

    #[tokio::test]
    async fn test_refresh_unknown_device_is_an_error() {
        let scanner = use_case(table(), Arc::new(ScriptedProber::default()));

        let result = scanner.refresh_device(STRANGER).await;

        assert_eq!(result, Err(RefreshError::UnknownDevice(STRANGER)));
    }

    #[tokio::test]
    async fn test_refresh_device_records_reply() {
        let prober = ScriptedProber {
            hosts: HashMap::from([(Ipv4Addr::new(10, 0, 0, 7), FOO)]),
            ..Default::default()
        };
        let scanner = use_case(table(), Arc::new(prober));

        let device = scanner.refresh_device(FOO).await.unwrap();

        assert_eq!(device.name, "foo");
        assert_eq!(device.ip, Some(Ipv4Addr::new(10, 0, 0, 7)));
        assert!(device.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_refresh_without_reply_returns_current_record() {
        let table = table();
        table.update(BAR, Ipv4Addr::new(10, 0, 0, 3), Utc::now());
        let before = table.get(&BAR).unwrap();
        let scanner = use_case(table, Arc::new(ScriptedProber::default()));

        let device = scanner.refresh_device(BAR).await.unwrap();

        assert_eq!(device, before);
    }

    #[tokio::test]
    async fn test_refresh_survives_probe_error() {
        let mut mock = MockArpProber::new();
        mock.expect_probe_mac()
            .times(1)
            .returning(|_, _, _| Err(ProbeError::ReaderStopped));
        let scanner = use_case(table(), Arc::new(mock));

        let device = scanner.refresh_device(FOO).await.unwrap();

        assert!(!device.is_seen());
    }

    #[tokio::test]
    async fn test_refresh_all_probes_every_device_in_seed_order_output() {
        let prober = Arc::new(ScriptedProber {
            hosts: HashMap::from([(Ipv4Addr::new(10, 0, 0, 2), BAR)]),
            ..Default::default()
        });
        let scanner = use_case(table(), prober.clone());

        let devices = scanner.refresh_all().await;

        assert_eq!(devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), ["foo", "bar"]);
        assert!(devices[1].is_seen());
        let mut called = prober.probe_mac_calls.lock().unwrap().clone();
        called.sort();
        assert_eq!(called, {
            let mut v = vec![FOO, BAR];
            v.sort();
            v
        });
    }

    // ── run_scan_loop ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_scan_loop_keeps_cycling_and_stops_on_flag() {
        // Arrange: every probe times out; count cycles through the mock.
        let calls = Arc::new(AtomicUsize::new(0));
        let mut mock = MockArpProber::new();
        let counter = calls.clone();
        mock.expect_probe().returning(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });
        let scanner = Arc::new(ScanPresenceUseCase::new(
            table(),
            Arc::new(mock),
            vec![Ipv4Addr::new(10, 0, 0, 1)],
            1,
            Duration::from_millis(1),
        ));
        let running = Arc::new(AtomicBool::new(true));

        // Act
        let handle = tokio::spawn(run_scan_loop(
            scanner,
            Duration::from_millis(10),
            running.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        running.store(false, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop after the flag is cleared")
            .unwrap();

        // Assert: more than one cycle ran despite every probe timing out.
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
