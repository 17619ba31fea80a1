use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Endpoint and token for the optional cloud replication service.
    /// Both absent means the core runs local-only.
    pub replica_url: Option<String>,
    pub replica_token: Option<String>,

    /// Legacy records migrated per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Budget for a single renderer invocation before falling back to
    /// plain text.
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Consecutive successes required to reach Healthy.
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Consecutive failures in Degraded before the type goes Failed.
    #[serde(default = "default_failed_threshold")]
    pub failed_threshold: u32,

    /// How long a Failed operation type refuses new outbound pushes.
    #[serde(default = "default_push_backoff_secs")]
    pub push_backoff_secs: u64,

    /// Queued (not in-flight) replication requests allowed per type.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for a single replication network call.
    #[serde(default = "default_replica_timeout_secs")]
    pub replica_timeout_secs: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("steady-reader");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_render_timeout_ms() -> u64 {
    3_000
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_failed_threshold() -> u32 {
    3
}

fn default_push_backoff_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    32
}

fn default_replica_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            replica_url: None,
            replica_token: None,
            batch_size: default_batch_size(),
            render_timeout_ms: default_render_timeout_ms(),
            healthy_threshold: default_healthy_threshold(),
            failed_threshold: default_failed_threshold(),
            push_backoff_secs: default_push_backoff_secs(),
            queue_capacity: default_queue_capacity(),
            replica_timeout_secs: default_replica_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steady-reader")
            .join("config.toml")
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn push_backoff(&self) -> Duration {
        Duration::from_secs(self.push_backoff_secs)
    }

    pub fn replica_timeout(&self) -> Duration {
        Duration::from_secs(self.replica_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.render_timeout_ms, 3_000);
        assert_eq!(config.healthy_threshold, 2);
        assert_eq!(config.failed_threshold, 3);
        assert!(config.replica_url.is_none());
    }

    #[test]
    fn toml_round_trip_preserves_options() {
        let mut config = Config::default();
        config.replica_url = Some("https://replica.example.com".to_string());
        config.batch_size = 10;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.replica_url, config.replica_url);
        assert_eq!(parsed.batch_size, 10);
    }
}
