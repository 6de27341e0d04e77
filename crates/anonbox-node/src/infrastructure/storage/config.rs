//! TOML-based configuration for the node.
//!
//! Reads and writes [`AppConfig`] at the platform-appropriate path:
//! - Windows:  `%APPDATA%\AnonBox\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/anonbox/config.toml` or `~/.config/anonbox/config.toml`
//! - macOS:    `~/Library/Application Support/AnonBox/config.toml`
//!
//! Example:
//!
//! ```toml
//! [node]
//! display_name = "Alice"
//! passphrase = "secret123"
//!
//! [network]
//! listen_port = 40100
//! discovery_port = 54545
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section or a
//! missing key all fall back to the values documented below.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

    /// `network.bind_address` is not an IP address.
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Identity, encryption and local behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Display name advertised to peers.  `None` ⇒ `Anon-<id prefix>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Shared passphrase.  `None` or empty ⇒ messages travel unencrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory received attachments are written to.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

/// Sockets, discovery and resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address the TCP listener binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP listen port.  `0` lets the OS pick one.
    #[serde(default)]
    pub listen_port: u16,
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
    /// UDP port for discovery datagrams.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    /// Seconds without an announcement before a peer is dropped.
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
    /// Maximum inbound connections handled at once.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Largest accepted frame payload in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// In-memory chat history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    /// Lines kept before the oldest is evicted.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_true() -> bool {
    true
}
fn default_discovery_port() -> u16 {
    54545
}
fn default_service_type() -> String {
    "_anonbox._tcp.local.".to_string()
}
fn default_announce_interval_secs() -> u64 {
    2
}
fn default_record_ttl_secs() -> u64 {
    10
}
fn default_max_connections() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_history_capacity() -> usize {
    500
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            passphrase: None,
            log_level: default_log_level(),
            download_dir: default_download_dir(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            listen_port: 0,
            discovery_enabled: default_true(),
            discovery_port: default_discovery_port(),
            service_type: default_service_type(),
            announce_interval_secs: default_announce_interval_secs(),
            record_ttl_secs: default_record_ttl_secs(),
            max_connections: default_max_connections(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl NetworkConfig {
    /// The socket address the TCP listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] if `bind_address` does not
    /// parse as an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs.max(1))
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
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config at the platform path; see [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
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

/// Writes a default config file at the platform path on first run.
///
/// Returns the path when a file was created, `None` when one already existed.
pub fn init_config() -> Result<Option<PathBuf>, ConfigError> {
    let path = config_file_path()?;
    Ok(write_default_config_to(&path)?.then_some(path))
}

/// Writes `AppConfig::default()` to `path` unless a file is already there.
///
/// Returns `true` if the file was created.  An existing file is never
/// touched, even if it fails to parse.
pub fn write_default_config_to(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    save_config_to(&AppConfig::default(), path)?;
    Ok(true)
}

/// Writes `config` to `path`, creating parent directories as needed.
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

/// Resolves the platform config directory including the `AnonBox` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("AnonBox"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("anonbox"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("AnonBox")
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
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("anonbox_cfg_{}", Uuid::new_v4()))
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_network_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.network.listen_port, 0);
        assert_eq!(cfg.network.discovery_port, 54545);
        assert_eq!(cfg.network.service_type, "_anonbox._tcp.local.");
        assert_eq!(cfg.network.max_connections, 256);
        assert_eq!(cfg.network.max_frame_bytes, 64 * 1024 * 1024);
        assert!(cfg.network.discovery_enabled);
    }

    #[test]
    fn test_app_config_default_node_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.node.log_level, "info");
        assert_eq!(cfg.node.download_dir, PathBuf::from("."));
        assert!(cfg.node.passphrase.is_none());
        assert!(cfg.node.display_name.is_none());
        assert_eq!(cfg.history.capacity, 500);
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_overrides_only_given_keys() {
        // Arrange
        let toml_str = r#"
[node]
display_name = "Alice"
passphrase = "secret123"

[network]
listen_port = 40100
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.node.display_name.as_deref(), Some("Alice"));
        assert_eq!(cfg.node.passphrase.as_deref(), Some("secret123"));
        assert_eq!(cfg.network.listen_port, 40100);
        assert_eq!(cfg.network.discovery_port, 54545);
        assert_eq!(cfg.history.capacity, 500);
    }

    #[test]
    fn test_unset_secrets_are_omitted_from_toml() {
        let toml_str = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(!toml_str.contains("passphrase"));
        assert!(!toml_str.contains("display_name"));
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    // ── Derived values ────────────────────────────────────────────────────────

    #[test]
    fn test_listen_addr_combines_address_and_port() {
        let mut network = NetworkConfig::default();
        network.bind_address = "127.0.0.1".to_string();
        network.listen_port = 40100;

        assert_eq!(
            network.listen_addr().unwrap(),
            "127.0.0.1:40100".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_listen_addr_rejects_hostname() {
        let mut network = NetworkConfig::default();
        network.bind_address = "localhost".to_string();

        assert!(matches!(
            network.listen_addr(),
            Err(ConfigError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_zero_intervals_are_clamped_to_one_second() {
        let mut network = NetworkConfig::default();
        network.announce_interval_secs = 0;
        network.record_ttl_secs = 0;

        assert_eq!(network.announce_interval(), Duration::from_secs(1));
        assert_eq!(network.record_ttl(), Duration::from_secs(1));
    }

    // ── File round trip ───────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = temp_dir().join("config.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip_creates_directories() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.node.log_level = "debug".to_string();
        cfg.network.record_ttl_secs = 30;

        // Act
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_write_default_config_creates_file_once() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("anonbox").join("config.toml");

        // Act
        let first = write_default_config_to(&path).unwrap();
        std::fs::write(&path, "[node]\nlog_level = \"debug\"\n").unwrap();
        let second = write_default_config_to(&path).unwrap();

        // Assert
        assert!(first);
        assert!(!second);
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(
            loaded.node.log_level, "debug",
            "existing file must be kept"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_config_file_loads_back_as_default() {
        let dir = temp_dir();
        let path = dir.join("config.toml");

        write_default_config_to(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("passphrase"));
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
