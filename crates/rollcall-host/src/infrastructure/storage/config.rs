//! TOML-based configuration for the host application.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Rollcall\config.toml`
//! - Linux:    `~/.config/rollcall/config.toml`
//! - macOS:    `~/Library/Application Support/Rollcall/config.toml`
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  A first run
//! without any config file, and upgrades from older files missing newer
//! fields, both resolve to working settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::SessionConfig;

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

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub session: SessionTuning,
}

/// General host behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Name shown to peers in their host pick lists.
    #[serde(default = "default_host_name")]
    pub host_name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for the attendance journal.  Absent means the platform
    /// data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

/// Network port and bind-address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// UDP port for session advertising broadcasts.
    #[serde(default = "default_advertise_port")]
    pub advertise_port: u16,
    /// TCP port for peer session connections.
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    /// IP address to bind the session listener to.  `"0.0.0.0"` binds all
    /// interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Milliseconds between ADVERTISE datagrams.
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
}

/// Session behaviour tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionTuning {
    /// Class/course/meeting reference stamped on the session.
    #[serde(default = "default_context_ref")]
    pub context_ref: String,
    /// Admission capacity: the transaction slot plus queued peers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Seconds a peer holds the slot before handshake eviction.
    #[serde(default = "default_handshake_window_secs")]
    pub handshake_window_secs: u64,
    /// Seconds granted for the participant's local identity check.
    #[serde(default = "default_local_auth_window_secs")]
    pub local_auth_window_secs: u64,
    /// Seed for wait estimates before any handshake completes, in seconds.
    #[serde(default = "default_service_time_seed_secs")]
    pub service_time_seed_secs: u64,
    /// Seconds between code rotations.  `0` keeps the starting code for the
    /// whole session.
    #[serde(default = "default_code_rotation_secs")]
    pub code_rotation_secs: u64,
}

impl SessionTuning {
    /// Maps the on-disk tunables to the application-layer [`SessionConfig`].
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            queue_capacity: self.queue_capacity,
            handshake_window: Duration::from_secs(self.handshake_window_secs),
            local_auth_window: Duration::from_secs(self.local_auth_window_secs),
            service_time_seed: Duration::from_secs(self.service_time_seed_secs),
            code_rotation: match self.code_rotation_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host_name() -> String {
    "rollcall-host".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_advertise_port() -> u16 {
    47700
}
fn default_session_port() -> u16 {
    47701
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_advertise_interval_ms() -> u64 {
    1000
}
fn default_context_ref() -> String {
    "ad-hoc".to_string()
}
fn default_queue_capacity() -> usize {
    8
}
fn default_handshake_window_secs() -> u64 {
    30
}
fn default_local_auth_window_secs() -> u64 {
    20
}
fn default_service_time_seed_secs() -> u64 {
    5
}
fn default_code_rotation_secs() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            network: NetworkConfig::default(),
            session: SessionTuning::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            log_level: default_log_level(),
            data_dir: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            advertise_port: default_advertise_port(),
            session_port: default_session_port(),
            bind_address: default_bind_address(),
            advertise_interval_ms: default_advertise_interval_ms(),
        }
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            context_ref: default_context_ref(),
            queue_capacity: default_queue_capacity(),
            handshake_window_secs: default_handshake_window_secs(),
            local_auth_window_secs: default_local_auth_window_secs(),
            service_time_seed_secs: default_service_time_seed_secs(),
            code_rotation_secs: default_code_rotation_secs(),
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
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`AppConfig`] from disk, returning `AppConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk, creating the config directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the attendance journal directory: the configured override if
/// present, otherwise the platform data directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when no override is set and
/// the platform directory cannot be determined.
pub fn resolve_data_dir(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &config.host.data_dir {
        return Ok(dir.clone());
    }
    platform_data_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Rollcall"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rollcall"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Rollcall")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Resolves the platform data base directory for the journal files.
fn platform_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        // XDG_DATA_HOME or ~/.local/share
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })?;
        Some(base.join("rollcall"))
    }

    #[cfg(not(target_os = "linux"))]
    {
        // Windows and macOS keep data next to the config.
        platform_config_dir()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
