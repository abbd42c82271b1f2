//! TOML-based configuration for the discovery client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Fir\config.toml`
//! - Linux:    `~/.config/fir/config.toml`
//! - macOS:    `~/Library/Application Support/Fir/config.toml`
//!
//! ```toml
//! [client]
//! log_level = "info"
//!
//! [network]
//! port = 7708
//! parallelism = 32
//! probe_timeout_ms = 10000
//! ```
//!
//! Every field has a `#[serde(default = "...")]` helper, so a missing file or
//! a file that only sets a few keys still yields a complete configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fir_core::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::device::DeviceTimeouts;
use crate::infrastructure::network::scanner::ScanOptions;

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

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Scan and pairing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Port used when a command does not name one.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum scan probes in flight.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Limit for one scan probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Limit for the pairing connect, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Limit for each read or write on a device connection, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Skip this host's own address when scanning.
    #[serde(default = "default_true")]
    pub exclude_self: bool,
    /// Emit a debug event for every probe.
    #[serde(default)]
    pub log_probes: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_parallelism() -> usize {
    32
}
fn default_probe_timeout_ms() -> u64 {
    10_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_io_timeout_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            parallelism: default_parallelism(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            exclude_self: default_true(),
            log_probes: false,
        }
    }
}

impl NetworkConfig {
    /// Scanner settings described by this config.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            parallelism: self.parallelism,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            exclude_self: self.exclude_self,
            log_probes: self.log_probes,
        }
    }

    /// Device timeouts described by this config.
    pub fn device_timeouts(&self) -> DeviceTimeouts {
        DeviceTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            io: Duration::from_millis(self.io_timeout_ms),
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

/// Loads `AppConfig` from the platform config file, returning defaults if the
/// file does not yet exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
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

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Fir"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("fir"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Fir"))
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
    use uuid::Uuid;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("fir-config-test-{}", Uuid::new_v4()))
            .join("config.toml")
    }

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn test_network_config_default_matches_protocol_defaults() {
        // Arrange / Act
        let cfg = NetworkConfig::default();

        // Assert
        assert_eq!(cfg.port, 7708);
        assert_eq!(cfg.parallelism, 32);
        assert_eq!(cfg.probe_timeout_ms, 10_000);
        assert!(cfg.exclude_self);
        assert!(!cfg.log_probes);
    }

    #[test]
    fn test_client_config_default_log_level_is_info() {
        assert_eq!(ClientConfig::default().log_level, "info");
    }

    #[test]
    fn test_scan_options_conversion() {
        let mut cfg = NetworkConfig::default();
        cfg.parallelism = 8;
        cfg.probe_timeout_ms = 250;

        let opts = cfg.scan_options();

        assert_eq!(opts.parallelism, 8);
        assert_eq!(opts.probe_timeout, Duration::from_millis(250));
        assert!(opts.exclude_self);
    }

    #[test]
    fn test_device_timeouts_conversion() {
        let timeouts = NetworkConfig::default().device_timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.io, Duration::from_secs(5));
    }

    // ── TOML parsing ─────────────────────────────────────────────────────────

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        // Arrange
        let text = "[network]\nport = 9000\n";

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.network.port, 9000);
        assert_eq!(cfg.network.parallelism, 32);
        assert_eq!(cfg.client.log_level, "info");
    }

    #[test]
    fn test_empty_toml_is_default_config() {
        let cfg: AppConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_serialized_config_carries_only_known_keys() {
        // Arrange / Act
        let text = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        let value: toml::Table = toml::from_str(&text).expect("reparse");

        // Assert
        let client = value.get("client").and_then(|v| v.as_table()).unwrap();
        let client_keys: Vec<&String> = client.keys().collect();
        assert_eq!(client_keys, vec!["log_level"]);
        assert!(!text.contains("version"));
    }

    #[test]
    fn test_legacy_version_key_is_ignored() {
        let text = "[client]\nversion = \"1.0\"\nlog_level = \"warn\"\n";
        let cfg: AppConfig = toml::from_str(text).expect("unknown keys are tolerated");
        assert_eq!(cfg.client.log_level, "warn");
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[network\nport = ").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    // ── Repository ───────────────────────────────────────────────────────────

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = temp_config_path();
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        // Arrange
        let path = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.client.log_level = "debug".to_string();
        cfg.network.exclude_self = false;
        cfg.network.io_timeout_ms = 1_500;

        // Act
        save_config_to(&path, &cfg).expect("save");
        let restored = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(restored, cfg);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_config_file_path_ends_with_fir_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("fir/config.toml"));
        }
    }
}
