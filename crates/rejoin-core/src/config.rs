//! Configuration system for the rejoin receiver.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $REJOIN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rejoin/config.toml
//!   3. ~/.config/rejoin/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RejoinConfig {
    pub network: NetworkConfig,
    pub pool: PoolConfig,
    pub receiver: ReceiverConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the snapshot data listener binds to.
    pub listen_addr: String,
    /// HTTP status port. 0 = disabled.
    pub status_port: u16,
    /// Frames buffered between the connection readers and the receive
    /// loop. Past this, readers stop reading and senders block.
    pub inbound_backlog: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of each decompressed-chunk buffer.
    pub decompressed_buffer_len: usize,
    /// Number of decompressed-chunk buffers. This is the receiver's
    /// backpressure limit: once all are held by the consumer, receipt stops.
    pub decompressed_buffers: usize,
    /// Capacity of each compressed-chunk buffer. 0 = derive from the
    /// codec's worst-case bound for `decompressed_buffer_len`.
    pub compressed_buffer_len: usize,
    pub compressed_buffers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// How often to re-check the decoded queue while draining after a
    /// transport failure.
    pub drain_poll_ms: u64,
    /// Extra wait after the queue drains, so a racing close() can land.
    pub drain_grace_ms: u64,
    /// Upper bound on the drain wait.
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub period_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:21212".to_string(),
            status_port: 0,
            inbound_backlog: 16,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            decompressed_buffer_len: 256 * 1024,
            decompressed_buffers: 16,
            compressed_buffer_len: 0,
            compressed_buffers: 16,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: 50,
            drain_grace_ms: 300,
            drain_timeout_ms: 5_000,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { period_secs: 5 }
    }
}

impl ReceiverConfig {
    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl WatchdogConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rejoin")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RejoinConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RejoinConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("REJOIN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RejoinConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the receiver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.decompressed_buffers == 0 {
            return Err(ConfigError::Invalid(
                "pool.decompressed_buffers",
                "must be at least 1".into(),
            ));
        }
        if self.pool.compressed_buffers == 0 {
            return Err(ConfigError::Invalid(
                "pool.compressed_buffers",
                "must be at least 1".into(),
            ));
        }
        if self.network.inbound_backlog == 0 {
            return Err(ConfigError::Invalid(
                "network.inbound_backlog",
                "must be at least 1".into(),
            ));
        }
        if self.pool.decompressed_buffer_len == 0 {
            return Err(ConfigError::Invalid(
                "pool.decompressed_buffer_len",
                "must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply REJOIN_* env var overrides. Values that fail to parse are
    /// ignored.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REJOIN_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        override_from_env("REJOIN_NETWORK__STATUS_PORT", &mut self.network.status_port);
        override_from_env(
            "REJOIN_NETWORK__INBOUND_BACKLOG",
            &mut self.network.inbound_backlog,
        );

        let pool = &mut self.pool;
        override_from_env(
            "REJOIN_POOL__DECOMPRESSED_BUFFER_LEN",
            &mut pool.decompressed_buffer_len,
        );
        override_from_env("REJOIN_POOL__DECOMPRESSED_BUFFERS", &mut pool.decompressed_buffers);
        override_from_env(
            "REJOIN_POOL__COMPRESSED_BUFFER_LEN",
            &mut pool.compressed_buffer_len,
        );
        override_from_env("REJOIN_POOL__COMPRESSED_BUFFERS", &mut pool.compressed_buffers);

        let receiver = &mut self.receiver;
        override_from_env("REJOIN_RECEIVER__DRAIN_POLL_MS", &mut receiver.drain_poll_ms);
        override_from_env("REJOIN_RECEIVER__DRAIN_GRACE_MS", &mut receiver.drain_grace_ms);
        override_from_env(
            "REJOIN_RECEIVER__DRAIN_TIMEOUT_MS",
            &mut receiver.drain_timeout_ms,
        );

        override_from_env("REJOIN_WATCHDOG__PERIOD_SECS", &mut self.watchdog.period_secs);
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Some(v) = std::env::var(key).ok().and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}
