//! Configuration management for Dukto.
//!
//! This module handles loading, saving, and managing Dukto configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/dukto/config.toml` |
//! | macOS | `~/Library/Application Support/org.dukto.Dukto/config.toml` |
//! | Windows | `%APPDATA%\dukto\Dukto\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use dukto_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Listening on port {}", config.network.port);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::platform::{default_dest_dir, Identity};
use crate::session::ProtocolOptions;
use crate::transfer::TransferOptions;

/// Shortest accepted interval between periodic hellos.
pub const MIN_HELLO_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted interval between periodic hellos.
pub const MAX_HELLO_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Shortest accepted idle or connect timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest accepted idle or connect timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Main configuration struct for Dukto.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name announced instead of the login name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buddy_name: Option<String>,
    /// Where received files go (desktop or home directory when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_dir: Option<PathBuf>,
}

/// Network configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port for discovery (UDP) and transfers (TCP)
    pub port: u16,
    /// Interval between periodic presence broadcasts
    #[serde(with = "humantime_serde")]
    pub hello_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            hello_interval: Duration::from_secs(crate::DEFAULT_HELLO_INTERVAL_SECS),
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Abort a transfer after this long without progress
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Give up on an outbound connect after this long
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Payload unit size in bytes (at most 1 MB)
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(crate::DEFAULT_IDLE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every duration is within its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        check_range(
            "network.hello_interval",
            self.network.hello_interval,
            MIN_HELLO_INTERVAL,
            MAX_HELLO_INTERVAL,
        )?;
        check_range(
            "transfer.idle_timeout",
            self.transfer.idle_timeout,
            MIN_TIMEOUT,
            MAX_TIMEOUT,
        )?;
        check_range(
            "transfer.connect_timeout",
            self.transfer.connect_timeout,
            MIN_TIMEOUT,
            MAX_TIMEOUT,
        )
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "dukto", "Dukto")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Destination for received files.
    #[must_use]
    pub fn dest_dir(&self) -> PathBuf {
        self.general.dest_dir.clone().unwrap_or_else(default_dest_dir)
    }

    /// Local identity with the configured buddy name applied.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::detect().with_buddy_name(self.general.buddy_name.as_deref())
    }

    /// Runtime options for a session coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] when a duration is out of range.
    pub fn protocol_options(&self) -> Result<ProtocolOptions> {
        self.validate()?;
        Ok(ProtocolOptions {
            port: self.network.port,
            hello_interval: self.network.hello_interval,
            dest_dir: self.dest_dir(),
            transfer: TransferOptions {
                chunk_size: self.transfer.chunk_size,
                idle_timeout: self.transfer.idle_timeout,
                connect_timeout: self.transfer.connect_timeout,
            },
        })
    }
}

fn check_range(key: &str, value: Duration, min: Duration, max: Duration) -> Result<()> {
    if value < min || value > max {
        return Err(Error::ConfigError(format!(
            "{key} must be between {}s and {}s, got {}s",
            min.as_secs(),
            max.as_secs(),
            value.as_secs()
        )));
    }
    Ok(())
}

/// Serde adapter for durations written as `"30s"`, `"5m"` or `"1h"`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        let (digits, unit) = match s.char_indices().last() {
            Some((i, 's')) => (&s[..i], 1),
            Some((i, 'm')) => (&s[..i], 60),
            Some((i, 'h')) => (&s[..i], 3600),
            _ => return Err(serde::de::Error::custom("invalid duration format")),
        };
        let n = digits
            .trim()
            .parse::<u64>()
            .map_err(serde::de::Error::custom)?;
        n.checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}
