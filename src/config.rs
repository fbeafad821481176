use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Per-connection transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Quiet period after which a connection that finished its response is
    /// pruned.
    pub idle_timeout_ms: u64,
    /// Scratch buffer size for each read.
    pub read_chunk_size: usize,
    /// Upper bound of bytes flushed per write-ready event.
    pub write_chunk_size: usize,
}

impl ConnectionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 60_000,
            read_chunk_size: 8192,
            write_chunk_size: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub log_level: String,
    pub connection: ConnectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Config {
    /// Builds the configuration from `LISTEN`, `LOG_LEVEL` and
    /// `IDLE_TIMEOUT_MS`, falling back to defaults.
    pub fn load() -> Self {
        let mut cfg = Self::default();
        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }
        if let Ok(raw) = std::env::var("IDLE_TIMEOUT_MS") {
            match raw.parse() {
                Ok(ms) => cfg.connection.idle_timeout_ms = ms,
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid IDLE_TIMEOUT_MS"),
            }
        }
        cfg
    }

    pub fn from_yaml(source: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(source).context("invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&source)
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.connection.read_chunk_size == 0 {
            anyhow::bail!("connection.read_chunk_size must be positive");
        }
        if self.connection.write_chunk_size == 0 {
            anyhow::bail!("connection.write_chunk_size must be positive");
        }
        Ok(())
    }
}
