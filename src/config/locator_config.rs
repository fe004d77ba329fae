//! `LocatorConfig`: TOML-backed settings for Reader, Router and Display

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::geo::PathLossModel;
use crate::transport::RetryPolicy;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "CELL_LOCATOR_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "cell_locator.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `LocatorConfig::load()` which searches:
/// 1. `$CELL_LOCATOR_CONFIG`
/// 2. `./cell_locator.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocatorConfig {
    #[serde(default)]
    pub sockets: SocketConfig,

    #[serde(default)]
    pub modem: ModemConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Router → Display reconnection
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub estimator: EstimatorConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

impl LocatorConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for unknown in super::validation::find_unknown_keys(&contents) {
            warn!(path = %path.display(), "{}", unknown);
        }

        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.sockets.router_path.as_os_str().is_empty() {
            errors.push("sockets.router_path must not be empty".to_string());
        }
        if self.sockets.display_path.as_os_str().is_empty() {
            errors.push("sockets.display_path must not be empty".to_string());
        }
        if self.sockets.router_path == self.sockets.display_path {
            errors.push(format!(
                "sockets.router_path and sockets.display_path must differ (both {})",
                self.sockets.router_path.display()
            ));
        }

        if self.modem.device.as_os_str().is_empty() {
            errors.push("modem.device must not be empty".to_string());
        }
        if self.modem.poll_command.trim().is_empty() {
            errors.push("modem.poll_command must not be empty".to_string());
        }
        if self.modem.response_timeout_secs == 0 {
            errors.push("modem.response_timeout_secs must be > 0".to_string());
        }
        if self.modem.poll_interval_secs == 0 {
            errors.push("modem.poll_interval_secs must be > 0".to_string());
        }
        if self.modem.max_response_bytes == 0 {
            errors.push("modem.max_response_bytes must be > 0".to_string());
        }

        if self.database.path.as_os_str().is_empty() {
            errors.push("database.path must not be empty".to_string());
        }

        if self.link.max_reconnect_attempts == 0 {
            errors.push("link.max_reconnect_attempts must be > 0".to_string());
        }

        let est = &self.estimator;
        if !est.reference_attenuation_db.is_finite() {
            errors.push(format!(
                "estimator.reference_attenuation_db must be finite (got {})",
                est.reference_attenuation_db
            ));
        }
        if !est.path_loss_exponent.is_finite() || est.path_loss_exponent <= 0.0 {
            errors.push(format!(
                "estimator.path_loss_exponent must be a positive number (got {})",
                est.path_loss_exponent
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Router's listening socket
    pub router_path: PathBuf,
    /// Display's listening socket
    pub display_path: PathBuf,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            router_path: PathBuf::from(defaults::ROUTER_SOCKET_PATH),
            display_path: PathBuf::from(defaults::DISPLAY_SOCKET_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Serial device node
    pub device: PathBuf,
    /// Sent once at startup; empty disables it
    pub init_command: String,
    pub poll_command: String,
    pub response_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_response_bytes: usize,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(defaults::MODEM_DEVICE),
            init_command: defaults::MODEM_INIT_COMMAND.to_string(),
            poll_command: defaults::MODEM_POLL_COMMAND.to_string(),
            response_timeout_secs: defaults::MODEM_RESPONSE_TIMEOUT_SECS,
            poll_interval_secs: defaults::MODEM_POLL_INTERVAL_SECS,
            max_response_bytes: defaults::MODEM_MAX_RESPONSE_BYTES,
        }
    }
}

impl ModemConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// OpenCellID-layout CSV
    pub path: PathBuf,
    /// Skip the first row
    pub has_header: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::TOWER_DB_PATH),
            has_header: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub max_reconnect_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: defaults::LINK_MAX_RECONNECT_ATTEMPTS,
            retry_delay_ms: defaults::LINK_RETRY_DELAY_MS,
        }
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Attenuation at 1 m (dB)
    pub reference_attenuation_db: f64,
    pub path_loss_exponent: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            reference_attenuation_db: defaults::REFERENCE_ATTENUATION_DB,
            path_loss_exponent: defaults::PATH_LOSS_EXPONENT,
        }
    }
}

impl EstimatorConfig {
    pub fn path_loss_model(&self) -> PathLossModel {
        PathLossModel {
            reference_attenuation_db: self.reference_attenuation_db,
            exponent: self.path_loss_exponent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// JSON-lines result log; an empty path disables it
    pub location_log: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            location_log: PathBuf::from(defaults::LOCATION_LOG_PATH),
        }
    }
}

impl DisplayConfig {
    pub fn location_log_path(&self) -> Option<&Path> {
        if self.location_log.as_os_str().is_empty() {
            None
        } else {
            Some(&self.location_log)
        }
    }
}
