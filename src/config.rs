//! Client configuration.
//!
//! Settings come from an optional JSON file and the environment:
//!
//! 1. `<config_dir>/kodi-link/config.json` (`~/.config` on Linux,
//!    `~/Library/Application Support` on macOS), if present
//! 2. `KODI_HOST` / `KODI_PORT` environment variables, which override the file
//!
//! Every field has a default, so a file only needs the keys it changes:
//!
//! ```json
//! { "hostname": "livingroom.local", "port": 9090 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::rpc::framing::MAX_BUFFER_SIZE;

/// Kodi's well-known JSON-RPC TCP port.
pub const DEFAULT_PORT: u16 = 9090;

/// Clamp a configured port into the valid TCP range.
///
/// Anything outside 1..=65535 falls back to [`DEFAULT_PORT`].
///
/// ```
/// use kodi_link::config::clamp_port;
///
/// assert_eq!(clamp_port(8080), 8080);
/// assert_eq!(clamp_port(0), 9090);
/// assert_eq!(clamp_port(70000), 9090);
/// ```
pub fn clamp_port(port: i64) -> u16 {
    match u16::try_from(port) {
        Ok(port) if port >= 1 => port,
        _ => DEFAULT_PORT,
    }
}

/// Connection target and timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Kodi host; empty disables the client.
    pub hostname: String,
    /// TCP port, clamped with [`clamp_port`] when read.
    pub port: i64,
    /// Upper bound on how long a call waits for its response.
    pub call_timeout_ms: u64,
    /// Socket read timeout.
    pub read_timeout_ms: u64,
    /// Socket write timeout; a stalled write fails after this long.
    pub write_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Pause between reconnect attempts while disconnected.
    pub reconnect_interval_ms: u64,
    /// Pause after the connection drops before reconnecting.
    pub reconnect_backoff_ms: u64,
    /// Bytes requested per socket read.
    pub read_chunk_size: usize,
    /// Cap on unparsed bytes held by the read loop.
    pub max_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: i64::from(DEFAULT_PORT),
            call_timeout_ms: 10_000,
            read_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            reconnect_interval_ms: 1_000,
            reconnect_backoff_ms: 10_000,
            read_chunk_size: 4096,
            max_buffer_size: MAX_BUFFER_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(hostname: impl Into<String>, port: i64) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    /// Load from the default config file (if any) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(
            std::env::var("KODI_HOST").ok(),
            std::env::var("KODI_PORT").ok(),
        );
        Ok(config)
    }

    /// Parse a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply host/port overrides, ignoring a port that is not a number.
    pub fn apply_overrides(&mut self, hostname: Option<String>, port: Option<String>) {
        if let Some(hostname) = hostname {
            self.hostname = hostname.trim().to_string();
        }
        if let Some(port) = port {
            match port.trim().parse::<i64>() {
                Ok(port) => self.port = port,
                Err(e) => warn!("Ignoring invalid port {:?}: {}", port, e),
            }
        }
    }

    /// The configured port after clamping.
    pub fn port(&self) -> u16 {
        clamp_port(self.port)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Location of the user config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kodi-link").join("config.json"))
}
