/// Configuration loading
///
/// Everything has a default, so a missing config file is fine. The file lives at
/// `~/.totalrecall/config.toml` unless a path is given explicitly.

use crate::error::{RecallError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory under $HOME holding the config, store and hooks
pub const HOME_DIR_NAME: &str = ".totalrecall";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub collector: CollectorConfig,
    pub capture: CaptureConfig,
    pub recall: RecallConfig,
    pub indexer: IndexerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file holding indexed events
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: base_dir().join("events.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Address the bus server listens on and clients connect to
    pub addr: String,
    /// Topic shared by every producer and subscriber of the pipeline
    pub topic: String,
    /// Per-topic buffer before slow subscribers start lagging
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:16379".to_string(),
            topic: "totalrecall".to_string(),
            capacity: crate::bus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// How the capture client reaches the collector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub http_addr: String,
    pub tcp_addr: String,
    /// Client-side connect/ack timeout, milliseconds
    pub timeout_ms: u64,
    pub transport: Transport,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            tcp_addr: "127.0.0.1:5170".to_string(),
            timeout_ms: 500,
            transport: Transport::Tcp,
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Env vars with this prefix belong to the shell hook, never to the event
    pub reserved_env_prefix: String,
    /// Case-insensitive regexes for env keys that are dropped
    pub skip_env_patterns: Vec<String>,
    /// Case-insensitive regexes for env keys whose values are hashed
    pub sensitive_env_patterns: Vec<String>,
    /// Audit `event` attribute values that count as process execution
    pub exec_event_types: Vec<String>,
    /// Optional file of argv templates to drop
    pub exclude_patterns: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            reserved_env_prefix: "___PREEXEC_".to_string(),
            skip_env_patterns: [
                r"^_+",
                r"^PS[12]$",
                r"^TERM$",
                r"^BASH_",
                r"^FUNCNAME$",
                r"^PIPESTATUS$",
                r"^TOTALRECALLROOT$",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sensitive_env_patterns: [
                r"secret",
                r"password",
                r"passwd",
                r"token",
                r"api[_-]?key",
                r"private[_-]?key",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exec_event_types: vec!["execve(2)".to_string()],
            exclude_patterns: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecallConfig {
    /// Maximum number of distinct commands shown
    pub max_rows: usize,
    /// Hits requested from the store per query
    pub window: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            max_rows: 30,
            window: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexerConfig {
    /// Total write attempts per event; 1 means log and move on
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further one
    pub backoff_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 100,
        }
    }
}

impl Config {
    /// Load config from `path`, or from the default location if `None`.
    ///
    /// An explicit path must exist; the default one may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bus.topic.trim().is_empty() {
            return Err(RecallError::Config("bus.topic must not be empty".to_string()));
        }
        if self.bus.capacity == 0 {
            return Err(RecallError::Config("bus.capacity must be positive".to_string()));
        }
        if self.recall.max_rows == 0 || self.recall.window == 0 {
            return Err(RecallError::Config(
                "recall.max_rows and recall.window must be positive".to_string(),
            ));
        }
        if self.indexer.max_attempts == 0 {
            return Err(RecallError::Config(
                "indexer.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `~/.totalrecall`, or `./.totalrecall` when there is no home directory
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    base_dir().join("config.toml")
}
