use crate::error::config::ConfigError;
use crate::keys::{IdleHidePolicy, NeverHide, VisibilityPolicy};

use common::ErrorLocation;

use std::env::{temp_dir, var_os};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_VERSION: u32 = 1;

pub const APP_DIR_NAME: &str = "keyserver";
pub const SOCKET_FILE_NAME: &str = "keyserver.sock";
pub const CONFIG_DIR_ENV: &str = "KEYSERVER_CONFIG_DIR";

const MIN_BACKLOG: u32 = 1;
const MAX_BACKLOG: u32 = 1024;
const MAX_STOP_TIMEOUT_MS: u64 = 600_000;
const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;

// ============================================
// CONFIG STRUCT
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Channel path. `None` means [`default_socket_path`].
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Time a client gets to send its request and take the response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Idle time after which published keys are hidden, e.g. `"15m"`.
    /// `None` keeps keys visible until hidden by hand.
    #[serde(default)]
    pub auto_hide_after: Option<String>,

    #[serde(default = "default_policy_sweep_interval_ms")]
    pub policy_sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            socket_path: None,
            listen_backlog: default_listen_backlog(),
            stop_timeout_ms: default_stop_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            auto_hide_after: None,
            policy_sweep_interval_ms: default_policy_sweep_interval_ms(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_listen_backlog() -> u32 {
    16
}
fn default_stop_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_policy_sweep_interval_ms() -> u64 {
    30_000
}

/// `$XDG_RUNTIME_DIR/keyserver/keyserver.sock`, or the same under the temp
/// dir where no runtime dir exists.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(temp_dir)
        .join(APP_DIR_NAME)
        .join(SOCKET_FILE_NAME)
}

/// `$KEYSERVER_CONFIG_DIR` if set, else the platform config dir.
pub fn default_config_dir() -> PathBuf {
    if let Some(dir) = var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .unwrap_or_else(temp_dir)
        .join(APP_DIR_NAME)
}

// ============================================
// IMPLEMENTATION
// ============================================

impl ServerConfig {
    /// Load config from {config_dir}/config.json.
    ///
    /// # Returns
    ///
    /// Returns defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read, parsed
    /// or validated.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {e}");
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: ServerConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {e}");
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/config.json via a temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation, serialization, the write or the
    /// rename fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{CONFIG_FILE_NAME}.tmp"));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid version: {} (expected 1-{CONFIG_VERSION})",
                    self.version
                ),
            });
        }

        if !(MIN_BACKLOG..=MAX_BACKLOG).contains(&self.listen_backlog) {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid listen_backlog: {} (must be {MIN_BACKLOG}-{MAX_BACKLOG})",
                    self.listen_backlog
                ),
            });
        }

        if self.stop_timeout_ms == 0 || self.stop_timeout_ms > MAX_STOP_TIMEOUT_MS {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid stop_timeout_ms: {} (must be 1-{MAX_STOP_TIMEOUT_MS})",
                    self.stop_timeout_ms
                ),
            });
        }

        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid request_timeout_ms: {} (must be 1-{MAX_REQUEST_TIMEOUT_MS})",
                    self.request_timeout_ms
                ),
            });
        }

        if self.policy_sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: String::from("policy_sweep_interval_ms must be positive"),
            });
        }

        if let Some(ref path) = self.socket_path
            && !path.is_absolute()
        {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!("socket_path must be absolute: {}", path.display()),
            });
        }

        self.auto_hide_after()?;

        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn policy_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.policy_sweep_interval_ms)
    }

    /// Parsed `auto_hide_after`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the value is not a
    /// humantime duration or is zero.
    pub fn auto_hide_after(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(ref text) = self.auto_hide_after else {
            return Ok(None);
        };

        let idle = humantime::parse_duration(text).map_err(|e| ConfigError::ValidationError {
            location: ErrorLocation::from(Location::caller()),
            reason: format!("Invalid auto_hide_after {text:?}: {e}"),
        })?;

        if idle.is_zero() {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: String::from("auto_hide_after must be positive"),
            });
        }

        Ok(Some(idle))
    }

    /// The policy the daemon's sweeps apply.
    pub fn visibility_policy(&self) -> Result<Box<dyn VisibilityPolicy>, ConfigError> {
        Ok(match self.auto_hide_after()? {
            Some(idle) => Box::new(IdleHidePolicy::new(idle)),
            None => Box::new(NeverHide),
        })
    }
}
