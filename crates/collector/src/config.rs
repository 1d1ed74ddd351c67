//! Collector configuration

use anyhow::{Context, Result};
use collector_lib::config::MonitorConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "COLLECTOR_CONFIG";

/// Collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Name reported in structured logs
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Collection interval in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Full relist period of each reflector in seconds
    #[serde(default = "default_resync")]
    pub resync_secs: u64,

    /// Datapoint ingest endpoint; batches are logged when unset
    #[serde(default)]
    pub ingest_url: Option<String>,

    /// Per-request timeout of the ingest transport in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Extra attempts for a failed batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    10
}

fn default_resync() -> u64 {
    300
}

fn default_send_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl CollectorConfig {
    /// Load configuration from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(file.as_deref().map(Path::new), environment())
    }

    /// Layer `env` over the file at `path`, if any
    pub fn load_from(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(env)
            .build()
            .context("Failed to read collector configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid collector configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than zero");
        }
        if self.resync_secs == 0 {
            anyhow::bail!("resync_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// `COLLECTOR_*` variables, `__` separating nested keys
fn environment() -> config::Environment {
    config::Environment::with_prefix("COLLECTOR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("monitor.extrametrics")
}
