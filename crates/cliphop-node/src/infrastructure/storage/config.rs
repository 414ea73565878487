//! TOML-based configuration for a Cliphop node.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate location:
//! - Windows:  `%APPDATA%\Cliphop\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/cliphop/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/Cliphop/config.toml`
//!
//! Every section and every field is optional.  A missing file, a missing
//! section, or a missing key all fall back to the defaults below:
//!
//! ```toml
//! [node]
//! log_level = "info"
//! # device_id = "MY-LAPTOP"        # defaults to the sanitised hostname
//!
//! [network]
//! trusted_subnet = "172.26.0.0/16"
//! listen_port = 5555
//! port_probe_attempts = 100
//! send_timeout_ms = 5000
//! max_payload_bytes = 1048576
//! service_type = "_cliphop._tcp.local."
//!
//! [sync]
//! auto_send = true
//! auto_receive = true
//! poll_interval_ms = 1000
//! rate_limit_ms = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use cliphop_core::{DeviceId, TrustedSubnet, MAX_PAYLOAD_BYTES};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::sync_controller::SyncSettings;

/// mDNS service type advertised and browsed by every node.
pub const DEFAULT_SERVICE_TYPE: &str = "_cliphop._tcp.local.";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

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

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Overrides the hostname-derived identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Addresses, ports and limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Only peers inside this IPv4 prefix are admitted or contacted.
    #[serde(default)]
    pub trusted_subnet: TrustedSubnet,
    /// First port the listener tries.  `0` lets the OS choose.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// How many consecutive ports to try before giving up.
    #[serde(default = "default_port_probe_attempts")]
    pub port_probe_attempts: u16,
    /// Connect-and-write deadline for one outbound message.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Largest encoded message accepted or sent.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

/// Clipboard sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub auto_send: bool,
    #[serde(default = "default_true")]
    pub auto_receive: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen_port() -> u16 {
    5555
}
fn default_port_probe_attempts() -> u16 {
    100
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_max_payload_bytes() -> usize {
    MAX_PAYLOAD_BYTES
}
fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_rate_limit_ms() -> u64 {
    100
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_id: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            trusted_subnet: TrustedSubnet::default(),
            listen_port: default_listen_port(),
            port_probe_attempts: default_port_probe_attempts(),
            send_timeout_ms: default_send_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            service_type: default_service_type(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_send: default_true(),
            auto_receive: default_true(),
            poll_interval_ms: default_poll_interval_ms(),
            rate_limit_ms: default_rate_limit_ms(),
        }
    }
}

impl NodeConfig {
    /// The configured identity, or one derived from `hostname`.
    ///
    /// A blank override is treated as absent.
    pub fn resolve_device_id(&self, hostname: &str) -> DeviceId {
        match self.device_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => DeviceId::new(id),
            _ => DeviceId::from_hostname(hostname),
        }
    }
}

impl NetworkConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        // A zero interval would spin; clamp to something sane.
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            auto_send: self.auto_send,
            auto_receive: self.auto_receive,
            rate_limit: Duration::from_millis(self.rate_limit_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`AppConfig`] from the platform location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads [`AppConfig`] from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to the platform location.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory including the `Cliphop` component.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Cliphop"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("cliphop"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Cliphop")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("cliphop_test_{}_{tag}", std::process::id()))
            .join("config.toml")
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_expected_network_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.listen_port, 5555);
        assert_eq!(cfg.network.port_probe_attempts, 100);
        assert_eq!(cfg.network.send_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.network.max_payload_bytes, 1024 * 1024);
        assert_eq!(cfg.network.trusted_subnet.to_string(), "172.26.0.0/16");
        assert_eq!(cfg.network.service_type, "_cliphop._tcp.local.");
    }

    #[test]
    fn test_sync_config_default_enables_both_directions() {
        let settings = SyncConfig::default().settings();
        assert!(settings.auto_send);
        assert!(settings.auto_receive);
        assert_eq!(settings.rate_limit, Duration::from_millis(100));
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let cfg = SyncConfig {
            poll_interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(50));
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_sections_override_defaults() {
        // Arrange
        let toml_str = r#"
[network]
trusted_subnet = "10.8.0.0/24"
listen_port = 7000

[sync]
auto_receive = false
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.trusted_subnet.to_string(), "10.8.0.0/24");
        assert_eq!(cfg.network.listen_port, 7000);
        assert_eq!(cfg.network.port_probe_attempts, 100);
        assert!(cfg.sync.auto_send);
        assert!(!cfg.sync.auto_receive);
        assert_eq!(cfg.node.log_level, "info");
    }

    #[test]
    fn test_deserialize_bad_subnet_returns_error() {
        let result: Result<AppConfig, toml::de::Error> =
            toml::from_str("[network]\ntrusted_subnet = \"not-a-subnet\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_device_id_without_override_derives_from_hostname() {
        let node = NodeConfig::default();
        assert_eq!(node.resolve_device_id("my-laptop.local").as_str(), "MY-LAPTOPLOCAL");
    }

    #[test]
    fn test_device_id_override_is_used_verbatim() {
        let node = NodeConfig {
            device_id: Some("Desk-1".to_string()),
            ..NodeConfig::default()
        };
        assert_eq!(node.resolve_device_id("ignored").as_str(), "Desk-1");
    }

    #[test]
    fn test_blank_device_id_override_is_ignored() {
        let node = NodeConfig {
            device_id: Some("   ".to_string()),
            ..NodeConfig::default()
        };
        assert_eq!(node.resolve_device_id("box").as_str(), "BOX");
    }

    // ── File round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        // Arrange
        let path = temp_config_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.network.listen_port = 12345;
        cfg.node.log_level = "debug".to_string();
        cfg.node.device_id = Some("DESK".to_string());

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_load_config_from_malformed_file_returns_parse_error() {
        let path = temp_config_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ nope").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
