//! Configuration
//!
//! Grouped settings with serde defaults; a missing file or missing fields
//! fall back to development defaults, so `tickstream-server` runs with no
//! arguments at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_pubsub_port")]
    pub pubsub_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pubsub_port: default_pubsub_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_token")]
    pub token: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_roll_bytes")]
    pub roll_bytes: u64,
    #[serde(default = "default_index_interval")]
    pub index_interval: u32,
    #[serde(default = "default_fsync_interval_ms")]
    pub fsync_interval_ms: u64,
}

impl StorageConfig {
    pub fn fsync_interval(&self) -> Duration {
        Duration::from_millis(self.fsync_interval_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            roll_bytes: default_roll_bytes(),
            index_interval: default_index_interval(),
            fsync_interval_ms: default_fsync_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_normalizer_threads")]
    pub normalizer_threads: usize,
    #[serde(default = "default_queue_capacity")]
    pub feed_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub frame_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub recorder_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalizer_threads: default_normalizer_threads(),
            feed_queue_capacity: default_queue_capacity(),
            frame_queue_capacity: default_queue_capacity(),
            recorder_queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_mock_enabled")]
    pub mock_enabled: bool,
    #[serde(default = "default_l1_rate")]
    pub l1_rate: u32,
    #[serde(default = "default_l2_rate")]
    pub l2_rate: u32,
    #[serde(default = "default_trade_rate")]
    pub trade_rate: u32,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            mock_enabled: default_mock_enabled(),
            l1_rate: default_l1_rate(),
            l2_rate: default_l2_rate(),
            trade_rate: default_trade_rate(),
        }
    }
}

fn default_pubsub_port() -> u16 {
    9100
}

fn default_token() -> String {
    "devtoken".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_roll_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_index_interval() -> u32 {
    10_000
}

fn default_fsync_interval_ms() -> u64 {
    50
}

fn default_normalizer_threads() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100_000
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_mock_enabled() -> bool {
    true
}

fn default_l1_rate() -> u32 {
    50_000
}

fn default_l2_rate() -> u32 {
    30_000
}

fn default_trade_rate() -> u32 {
    5_000
}
