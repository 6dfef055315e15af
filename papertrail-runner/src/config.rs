//! Application configuration: engine parameters plus feed and store settings,
//! loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use papertrail_core::{ConfigError, EngineConfig};

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

/// Top-level config file layout: `[engine]`, `[feed]`, `[store]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Binance,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub kind: FeedKind,
    /// Base websocket endpoint; the combined-stream path is appended.
    pub endpoint: String,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    /// Reconnect when nothing arrives for this long.
    pub idle_timeout_ms: u64,
    pub channel_capacity: usize,
    pub simulated: SimulatedConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::Binance,
            endpoint: "wss://stream.binance.com:9443".to_string(),
            reconnect_backoff_ms: 2000,
            connect_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            channel_capacity: 4096,
            simulated: SimulatedConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub tick_interval_ms: u64,
    /// Max relative move per step.
    pub volatility: f64,
    pub seed: Option<u64>,
    pub start_price: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            volatility: 0.002,
            seed: None,
            start_price: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state"),
        }
    }
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, AppConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| AppConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppConfigError> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.engine.normalize();
        config.engine.validate()?;
        Ok(config)
    }

    /// Starter config written by `papertrail init-config`.
    pub fn template() -> String {
        let mut config = AppConfig::default();
        config.engine.symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
