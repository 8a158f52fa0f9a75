//! Configuration file loading for game review.
//!
//! Settings live in `game-review.toml`. Every field has a default, so an
//! empty or missing file is a valid configuration.

use chess_analysis::{AnalysisConfig, ClassifierConfig, PoolConfig, SearchLimit, SummaryConfig, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Values that parse but cannot work together.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// The analysis engine executable and its UCI options.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineSection {
    /// Defaults to "stockfish" (assumes it's in PATH).
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,
    /// `setoption` values sent after every engine start.
    #[serde(default)]
    pub options: HashMap<String, String>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("stockfish")
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            options: HashMap::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Size and timing of the engine pool.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolSection {
    /// Number of engine processes. Defaults to the number of CPU cores.
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

fn default_pool_size() -> usize {
    num_cpus::get()
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

/// Search settings shared by every analyzed position.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalysisSection {
    /// Fixed search depth. Ignored when `movetime_ms` is set.
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Fixed search time per position, in milliseconds.
    #[serde(default)]
    pub movetime_ms: Option<u64>,
    #[serde(default = "default_lines")]
    pub lines: u32,
    #[serde(default)]
    pub opening_book_plies: usize,
    /// Games analyzed at the same time.
    #[serde(default = "default_concurrent_games")]
    pub concurrent_games: usize,
}

fn default_depth() -> u32 {
    11
}

fn default_lines() -> u32 {
    3
}

fn default_concurrent_games() -> usize {
    2
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            movetime_ms: None,
            lines: default_lines(),
            opening_book_plies: 0,
            concurrent_games: default_concurrent_games(),
        }
    }
}

impl AnalysisSection {
    pub fn limit(&self) -> SearchLimit {
        match self.movetime_ms {
            Some(ms) => SearchLimit::MoveTime(ms),
            None => SearchLimit::Depth(self.depth),
        }
    }
}

/// Where results are kept.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageSection {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Evaluations kept in the database after pruning.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
}

fn default_database() -> PathBuf {
    PathBuf::from("data/game-review.db")
}

fn default_max_cache_entries() -> usize {
    200_000
}

impl Default for StorageSection {
    fn default() -> Self {
        Self { database: default_database(), max_cache_entries: default_max_cache_entries() }
    }
}

/// Main review configuration.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ReviewConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub classification: ClassifierConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub storage: StorageSection,
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ReviewConfig {
    /// Loads the configuration from disk.
    ///
    /// With an explicit `path` the file must exist. Without one,
    /// [`Self::config_path()`] is tried and a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file cannot be read,
    /// [`ConfigError::ParseError`] if it contains invalid TOML, or
    /// [`ConfigError::Invalid`] if the values fail validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    toml::from_str(&std::fs::read_to_string(&default_path)?)?
                } else {
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Returns `game-review.toml` in the current working directory.
    pub fn config_path() -> PathBuf {
        PathBuf::from("game-review.toml")
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.size == 0 {
            return Err(ConfigError::Invalid("pool.size must be at least 1".to_string()));
        }
        if self.analysis.concurrent_games == 0 {
            return Err(ConfigError::Invalid("analysis.concurrent_games must be at least 1".to_string()));
        }
        if self.engine.handshake_timeout_ms == 0 || self.engine.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("engine timeouts must be positive".to_string()));
        }
        self.analysis_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.pool.size,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            probe_interval: Duration::from_millis(self.pool.probe_interval_ms),
            worker: WorkerConfig {
                options: self.engine.options.clone(),
                handshake_timeout: Duration::from_millis(self.engine.handshake_timeout_ms),
                request_timeout: Duration::from_millis(self.engine.request_timeout_ms),
            },
        }
    }

    /// Analysis settings for the pipeline. The summary shares the
    /// classifier's mate value so both see the same scale.
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            limit: self.analysis.limit(),
            lines: self.analysis.lines,
            opening_book_plies: self.analysis.opening_book_plies,
            classifier: self.classification.clone(),
            summary: SummaryConfig { mate_score: self.classification.mate_score, ..self.summary.clone() },
        }
    }
}
