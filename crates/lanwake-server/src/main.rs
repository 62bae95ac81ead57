//! lanwake server entry point.
//!
//! Loads the TOML configuration, starts every enabled subsystem and runs
//! until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- lanwake.toml (defaults if missing)
//!  └─ PresenceTable::seed()    -- configured devices, all unseen
//!  └─ per interface
//!       ├─ passive sniffer     (OS thread, pnet capture)
//!       └─ scan loop           (Tokio task + ARP reply reader thread)
//!  └─ challenge gate           (Tokio task, raw TCP)
//!  └─ HTTP API                 (Tokio task, axum)
//! ```
//!
//! A subsystem that cannot start (no privileges for raw sockets, missing
//! interface) is logged and skipped; the others keep running.  Only a bad
//! configuration file or an unbindable API port aborts startup.
//!
//! # Usage
//!
//! ```text
//! lanwake-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Configuration file [env: LANWAKE_CONFIG] [default: lanwake.toml]
//!   --api-port <PORT>    Override `api_port` from the file [env: LANWAKE_API_PORT]
//!   --no-challenge       Do not start the challenge gate even if configured
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lanwake_core::PresenceTable;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lanwake_server::application::scan_presence::{run_scan_loop, ScanPresenceUseCase};
use lanwake_server::application::wake_device::WakeDeviceUseCase;
use lanwake_server::infrastructure::http::host_filter::HostAllowList;
use lanwake_server::infrastructure::http::{self, ApiState};
use lanwake_server::infrastructure::network::arp_prober::PnetArpProber;
use lanwake_server::infrastructure::network::challenge_server::{
    bind_gate, run_gate, ChallengeGate, GateSettings,
};
use lanwake_server::infrastructure::network::interfaces::{resolve_interface, resolve_scan_range};
use lanwake_server::infrastructure::network::sniffer::spawn_sniffer;
use lanwake_server::infrastructure::network::wol_sender::UdpWakeSender;
use lanwake_server::infrastructure::storage::config::{
    load_config, AppConfig, ChallengeConfig, PresenceConfig,
};
use lanwake_server::infrastructure::supervisor::BackgroundServices;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN presence tracker and Wake-on-LAN relay.
#[derive(Debug, Parser)]
#[command(name = "lanwake-server", version)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// A missing file is not an error; built-in defaults are used.
    #[arg(long, default_value = "lanwake.toml", env = "LANWAKE_CONFIG")]
    config: PathBuf,

    /// Port for the HTTP API, overriding the configuration file.
    #[arg(long, env = "LANWAKE_API_PORT")]
    api_port: Option<u16>,

    /// Skip the challenge gate even when a `[challenge]` section exists.
    #[arg(long)]
    no_challenge: bool,
}

impl Cli {
    /// Loads the configuration and applies command-line overrides.
    fn into_config(self) -> anyhow::Result<(AppConfig, bool)> {
        let mut cfg = load_config(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(port) = self.api_port {
            cfg.api_port = port;
        }
        Ok((cfg, !self.no_challenge))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, challenge_enabled) = Cli::parse().into_config()?;

    // `RUST_LOG` wins over `log_level` from the file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();

    info!("lanwake starting");

    let mut services = BackgroundServices::new();
    let waker = Arc::new(WakeDeviceUseCase::new(Arc::new(UdpWakeSender::new(
        cfg.broadcast_address,
        cfg.broadcast_port,
    ))));

    // ── Presence tracking ─────────────────────────────────────────────────────
    let (table, scanners) = match &cfg.presence {
        Some(presence) => {
            let (table, scanners) = start_presence(presence, &mut services)?;
            (Some(table), scanners)
        }
        None => {
            info!("no [presence] section; presence tracking disabled");
            (None, Vec::new())
        }
    };

    // ── Challenge gate ────────────────────────────────────────────────────────
    match (&cfg.challenge, challenge_enabled) {
        (Some(challenge), true) => start_challenge(challenge, Arc::clone(&waker), &mut services).await?,
        (Some(_), false) => info!("challenge gate disabled by --no-challenge"),
        (None, _) => {}
    }

    // ── HTTP API ──────────────────────────────────────────────────────────────
    let listener = http::bind_api(cfg.api_addr())
        .await
        .with_context(|| format!("failed to bind HTTP API on {}", cfg.api_addr()))?;
    let app = http::router(
        ApiState {
            table,
            scanners,
            waker,
        },
        HostAllowList::new(&cfg.allowed_hosts),
    );
    let running = services.running();
    services.spawn_task("http-api", async move {
        if let Err(e) = http::serve(listener, app, running).await {
            error!("HTTP API stopped with error: {e}");
        }
    });

    info!(workers = services.len(), "lanwake ready.  Press Ctrl-C to exit.");

    // ── Ctrl-C ────────────────────────────────────────────────────────────────
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for Ctrl-C: {e}; shutting down"),
    }

    services.shutdown().await;
    info!("lanwake stopped");
    Ok(())
}

/// Seeds the table and starts a sniffer, plus a scan loop when enabled, on
/// each configured interface.
fn start_presence(
    presence: &PresenceConfig,
    services: &mut BackgroundServices,
) -> anyhow::Result<(Arc<PresenceTable>, Vec<Arc<ScanPresenceUseCase>>)> {
    let devices = presence.seed_devices()?;
    info!(devices = devices.len(), policy = ?presence.unknown_mac_policy, "presence table seeded");
    let table = Arc::new(PresenceTable::with_devices(devices, presence.unknown_mac_policy));

    let names = presence.interface_names();
    let wanted: Vec<Option<&str>> = if names.is_empty() {
        vec![None]
    } else {
        names.iter().map(|name| Some(name.as_str())).collect()
    };

    let mut scanners = Vec::new();
    for name in wanted {
        let interface = match resolve_interface(name) {
            Ok(interface) => interface,
            Err(e) => {
                warn!("{e}; skipping interface");
                continue;
            }
        };
        let label = interface.name.clone();

        match spawn_sniffer(&interface, Arc::clone(&table), services.running()) {
            Ok(handle) => services.add_thread(format!("sniffer-{label}"), handle),
            Err(e) => warn!(interface = %label, "passive sniffing unavailable: {e}"),
        }

        if !presence.scan {
            continue;
        }
        let range = match resolve_scan_range(interface) {
            Ok(range) => range,
            Err(e) => {
                warn!(interface = %label, "active scanning unavailable: {e}");
                continue;
            }
        };
        let (prober, reader) = match PnetArpProber::open(&range, services.running()) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(interface = %label, "active scanning unavailable: {e}");
                continue;
            }
        };
        services.add_thread(format!("arp-reader-{label}"), reader);

        let scanner = Arc::new(ScanPresenceUseCase::new(
            Arc::clone(&table),
            Arc::new(prober),
            range.targets,
            presence.probe_concurrency,
            presence.probe_timeout(),
        ));
        services.spawn_task(
            format!("scan-{label}"),
            run_scan_loop(Arc::clone(&scanner), presence.interval(), services.running()),
        );
        scanners.push(scanner);
    }

    if presence.scan && scanners.is_empty() {
        warn!("no interface could be scanned; /update is unavailable");
    }
    Ok((table, scanners))
}

/// Binds the challenge gate.  A bind failure disables the gate only.
async fn start_challenge(
    challenge: &ChallengeConfig,
    waker: Arc<WakeDeviceUseCase>,
    services: &mut BackgroundServices,
) -> anyhow::Result<()> {
    let settings = GateSettings {
        secret: challenge.secret.clone(),
        target: challenge.target()?,
        read_timeout: challenge.read_timeout(),
        max_response_bytes: challenge.max_response_bytes,
    };

    match bind_gate(challenge.addr()).await {
        Ok(listener) => {
            let gate = Arc::new(ChallengeGate::new(settings, waker));
            services.spawn_task("challenge-gate", run_gate(listener, gate, services.running()));
        }
        Err(e) => error!("failed to bind challenge gate on {}: {e}", challenge.addr()),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
