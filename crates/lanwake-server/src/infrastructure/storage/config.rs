//! TOML configuration for the lanwake server.
//!
//! The file path comes from `--config` (or `LANWAKE_CONFIG`); a missing file
//! means "all defaults", which starts the HTTP API and the wake relay with
//! presence tracking and the challenge gate switched off.
//!
//! # Example
//!
//! ```toml
//! log_level = "info"
//! api_port = 8080
//! broadcast_address = "192.168.1.255"
//! allowed_hosts = ["wake.lan"]
//!
//! [presence]
//! interfaces = ["eth0"]
//! scan = true
//! interval_secs = 60
//!
//! [[presence.devices]]
//! name = "desktop"
//! mac = "AA:BB:CC:DD:EE:FF"
//!
//! [challenge]
//! port = 5000
//! secret = "change me"
//! target_mac = "AA:BB:CC:DD:EE:FF"
//! ```
//!
//! # Optional sections
//!
//! `[presence]` and `[challenge]` are `Option`s: leaving a section out
//! disables that subsystem entirely (`/status` and `/update` answer 501; no
//! gate listener is bound).  Inside a section every field falls back to its
//! `#[serde(default = "...")]` value.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanwake_core::protocol::challenge::DIGEST_HEX_LEN;
use lanwake_core::{Device, InvalidAddress, MacAddress, UnknownMacPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A device entry has a malformed MAC address.
    #[error("device {name:?}: {source}")]
    DeviceMac {
        name: String,
        #[source]
        source: InvalidAddress,
    },

    /// The challenge target has a malformed MAC address.
    #[error("challenge target_mac: {0}")]
    TargetMac(#[source] InvalidAddress),

    /// A value is out of range or otherwise unusable.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Address the HTTP API binds to.
    #[serde(default = "default_api_bind")]
    pub api_bind: IpAddr,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Destination of magic packets.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: Ipv4Addr,
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Accepted `Host` header values.  Empty means "accept any host".
    /// `localhost` and `127.0.0.1` are always accepted.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeConfig>,
}

/// Presence tracking: passive sniffing plus optional active scanning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceConfig {
    /// Interfaces to sniff and scan.  Empty selects the host default.
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Whether to run the active prober (and allow `/update`).
    #[serde(default = "default_true")]
    pub scan: bool,
    /// Seconds between scan cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum probes in flight per interface.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    /// How long a single probe waits for its reply.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default)]
    pub unknown_mac_policy: UnknownMacPolicy,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// A configured device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub name: String,
    pub mac: String,
}

/// The stand-alone TCP wake gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeConfig {
    #[serde(default = "default_challenge_bind")]
    pub bind_address: IpAddr,
    #[serde(default = "default_challenge_port")]
    pub port: u16,
    /// Shared secret mixed into the digest.  Must not be empty.
    pub secret: String,
    /// The one machine this gate wakes.
    pub target_mac: String,
    /// Inactivity timeout while reading the response.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Upper bound on bytes buffered from one peer.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_api_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_api_port() -> u16 {
    8080
}
fn default_broadcast_address() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}
fn default_broadcast_port() -> u16 {
    9
}
fn default_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    60
}
fn default_probe_concurrency() -> usize {
    8
}
fn default_probe_timeout_ms() -> u64 {
    2000
}
fn default_challenge_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_challenge_port() -> u16 {
    5000
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_max_response_bytes() -> usize {
    1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_bind: default_api_bind(),
            api_port: default_api_port(),
            broadcast_address: default_broadcast_address(),
            broadcast_port: default_broadcast_port(),
            allowed_hosts: Vec::new(),
            presence: None,
            challenge: None,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            scan: default_true(),
            interval_secs: default_interval_secs(),
            probe_concurrency: default_probe_concurrency(),
            probe_timeout_ms: default_probe_timeout_ms(),
            unknown_mac_policy: UnknownMacPolicy::default(),
            devices: Vec::new(),
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl AppConfig {
    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::new(self.api_bind, self.api_port)
    }

    /// Checks everything serde cannot: MAC syntax, secrets, ranges.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(presence) = &self.presence {
            presence.seed_devices()?;
            if presence.interval_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: "presence.interval_secs",
                    reason: "must be at least 1".to_string(),
                });
            }
            if presence.probe_timeout_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "presence.probe_timeout_ms",
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(challenge) = &self.challenge {
            if challenge.secret.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "challenge.secret",
                    reason: "must not be empty".to_string(),
                });
            }
            challenge.target()?;
            if challenge.read_timeout_ms == 0 {
                return Err(ConfigError::Invalid {
                    field: "challenge.read_timeout_ms",
                    reason: "must be at least 1".to_string(),
                });
            }
            if challenge.max_response_bytes < DIGEST_HEX_LEN {
                return Err(ConfigError::Invalid {
                    field: "challenge.max_response_bytes",
                    reason: format!("must be at least {DIGEST_HEX_LEN}"),
                });
            }
        }
        Ok(())
    }
}

impl PresenceConfig {
    /// Parses the device list into seed records.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DeviceMac`] for the first malformed address.
    pub fn seed_devices(&self) -> Result<Vec<Device>, ConfigError> {
        self.devices
            .iter()
            .map(|entry| {
                MacAddress::parse(&entry.mac)
                    .map(|mac| Device::unseen(entry.name.clone(), mac))
                    .map_err(|source| ConfigError::DeviceMac {
                        name: entry.name.clone(),
                        source,
                    })
            })
            .collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Interface names with duplicates removed, in config order.
    pub fn interface_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.interfaces
            .iter()
            .filter(|name| seen.insert(*name))
            .cloned()
            .collect()
    }
}

impl ChallengeConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::TargetMac`] if `target_mac` is malformed.
    pub fn target(&self) -> Result<MacAddress, ConfigError> {
        MacAddress::parse(&self.target_mac).map_err(ConfigError::TargetMac)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads and validates the config at `path`, returning defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, or a validation error.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(cfg)
}

/// Parses and validates config text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] or a validation error.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let cfg: AppConfig = toml::from_str(content)?;
    cfg.validate()?;
    Ok(cfg)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_expected_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.api_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.broadcast_address, Ipv4Addr::BROADCAST);
        assert_eq!(cfg.broadcast_port, 9);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.presence.is_none());
        assert!(cfg.challenge.is_none());
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_empty_presence_section_uses_defaults() {
        // Arrange
        let toml_str = "[presence]\n";

        // Act
        let cfg = parse_config(toml_str).unwrap();

        // Assert
        let presence = cfg.presence.unwrap();
        assert_eq!(presence, PresenceConfig::default());
        assert!(presence.scan);
        assert_eq!(presence.interval(), Duration::from_secs(60));
        assert_eq!(presence.probe_timeout(), Duration::from_secs(2));
        assert_eq!(presence.probe_concurrency, 8);
        assert_eq!(presence.unknown_mac_policy, UnknownMacPolicy::Ignore);
    }

    #[test]
    fn test_full_config_parses() {
        // Arrange
        let toml_str = r#"
log_level = "debug"
api_port = 9090
broadcast_address = "192.168.1.255"
allowed_hosts = ["wake.lan"]

[presence]
interfaces = ["eth0", "eth0", "wlan0"]
scan = false
unknown_mac_policy = "admit"

[[presence.devices]]
name = "foo"
mac = "aa-bb-cc-dd-ee-ff"

[challenge]
secret = "s3cret"
target_mac = "AABBCCDDEEFF"
"#;

        // Act
        let cfg = parse_config(toml_str).unwrap();

        // Assert
        assert_eq!(cfg.api_port, 9090);
        assert_eq!(cfg.allowed_hosts, vec!["wake.lan".to_string()]);
        let presence = cfg.presence.as_ref().unwrap();
        assert!(!presence.scan);
        assert_eq!(presence.unknown_mac_policy, UnknownMacPolicy::Admit);
        assert_eq!(presence.interface_names(), vec!["eth0", "wlan0"]);
        let seed = presence.seed_devices().unwrap();
        assert_eq!(seed[0].mac.to_string(), "AA:BB:CC:DD:EE:FF");
        let challenge = cfg.challenge.as_ref().unwrap();
        assert_eq!(challenge.addr().to_string(), "0.0.0.0:5000");
        assert_eq!(challenge.read_timeout(), Duration::from_secs(5));
        assert_eq!(challenge.max_response_bytes, 1024);
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_malformed_device_mac_is_rejected() {
        let toml_str = r#"
[[presence.devices]]
name = "broken"
mac = "ZZZZZZ"
"#;
        let err = parse_config(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::DeviceMac { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let toml_str = r#"
[challenge]
secret = ""
target_mac = "AA:BB:CC:DD:EE:FF"
"#;
        let err = parse_config(toml_str).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "challenge.secret",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_target_mac_is_rejected() {
        let toml_str = r#"
[challenge]
secret = "x"
target_mac = "AA:BB:CC"
"#;
        assert!(matches!(
            parse_config(toml_str).unwrap_err(),
            ConfigError::TargetMac(_)
        ));
    }

    #[test]
    fn test_challenge_without_secret_fails_to_parse() {
        let toml_str = "[challenge]\ntarget_mac = \"AA:BB:CC:DD:EE:FF\"\n";
        assert!(matches!(
            parse_config(toml_str).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_tiny_response_cap_is_rejected() {
        let toml_str = r#"
[challenge]
secret = "x"
target_mac = "AA:BB:CC:DD:EE:FF"
max_response_bytes = 16
"#;
        assert!(parse_config(toml_str).is_err());
    }

    #[test]
    fn test_zero_read_timeout_is_rejected() {
        // Arrange: a zero timeout would expire before any reply could arrive
        let toml_str = r#"
[challenge]
secret = "x"
target_mac = "AA:BB:CC:DD:EE:FF"
read_timeout_ms = 0
"#;

        // Act
        let err = parse_config(toml_str).unwrap_err();

        // Assert
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "challenge.read_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(parse_config("[presence]\ninterval_secs = 0\n").is_err());
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        assert!(matches!(
            parse_config("[[[ not valid toml").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    // ── load_config ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/lanwake.toml");
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_load_config_reads_file_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("lanwake_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lanwake.toml");
        std::fs::write(&path, "api_port = 12345\nlog_level = \"debug\"\n").unwrap();

        // Act
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded.api_port, 12345);
        assert_eq!(loaded.log_level, "debug");

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let mut cfg = AppConfig::default();
        cfg.presence = Some(PresenceConfig {
            devices: vec![DeviceEntry {
                name: "foo".to_string(),
                mac: "AA:BB:CC:DD:EE:FF".to_string(),
            }],
            ..PresenceConfig::default()
        });

        let text = toml::to_string_pretty(&cfg).unwrap();
        let restored = parse_config(&text).unwrap();

        assert_eq!(restored, cfg);
    }
}
