//! Configuration for the typing rhythm recorder.

use crate::core::event::LabelPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const APP_DIR: &str = "typing-rhythm";

/// Main configuration for the recorder and the stats aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fixed cadence of the background flush
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// Buffered events that trigger an early flush
    pub batch_size: usize,

    /// Maximum buffered events before the oldest are dropped
    pub buffer_capacity: usize,

    /// Upper bound on the final flush at shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How much key identity is kept in each label
    pub label_policy: LabelPolicy,

    /// Path for daily logs, the snapshot and transparency counters
    pub data_path: PathBuf,

    /// Where the stats snapshot is written; defaults under `data_path`
    pub stats_output: Option<PathBuf>,

    /// Aggregation parameters
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            flush_interval: Duration::from_secs(60),
            batch_size: 100,
            buffer_capacity: 10_000,
            shutdown_timeout: Duration::from_secs(5),
            label_policy: LabelPolicy::Exact,
            data_path: data_dir,
            stats_output: None,
            stats: StatsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does
    /// not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(io_err)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Directory holding the daily CSV logs.
    pub fn raw_log_dir(&self) -> PathBuf {
        self.data_path.join("raw")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    pub fn stats_output_path(&self) -> PathBuf {
        self.stats_output
            .clone()
            .unwrap_or_else(|| self.data_path.join("typing_stats.json"))
    }

    /// Point every derived path at a different data directory.
    pub fn with_data_path(mut self, data_path: PathBuf) -> Self {
        self.data_path = data_path;
        self
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let dir = self.raw_log_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir, source })
    }
}

/// Parameters of the stats aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Width of each WPM window
    #[serde(with = "duration_serde")]
    pub wpm_window: Duration,

    /// Intervals below this count as fast keystrokes
    pub burst_threshold_ms: u64,

    /// Minimum events in a reported burst
    pub min_burst_events: usize,

    /// A run of more consecutive backspaces than this ends a burst
    pub max_backspace_run: usize,

    /// Gaps longer than this start a new session
    #[serde(with = "duration_serde")]
    pub idle_threshold: Duration,

    /// Ascending upper edges of the interval histogram buckets
    pub bucket_edges_ms: Vec<u64>,

    /// Keep only this many of the most recent WPM points
    pub max_wpm_points: Option<usize>,

    /// Keep only this many of the most recent bursts
    pub max_bursts: Option<usize>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            wpm_window: Duration::from_secs(300),
            burst_threshold_ms: 500,
            min_burst_events: 2,
            max_backspace_run: 5,
            idle_threshold: Duration::from_secs(300),
            bucket_edges_ms: vec![50, 100, 150, 200, 300, 500, 1000, 2000],
            max_wpm_points: Some(100),
            max_bursts: Some(50),
        }
    }
}

impl StatsConfig {
    pub fn idle_threshold_ms(&self) -> u64 {
        self.idle_threshold.as_millis() as u64
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
