//! Daemon configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.
//! The binary loads the file first and applies command-line overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error loading or validating a config file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid JSON or has wrongly typed fields.
    Parse(serde_json::Error),
    /// A value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "invalid config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Events retained by the event buffer. Default: 10000.
    pub event_capacity: usize,
    /// Distinct groups tracked by the event buffer. Default: 5000.
    pub group_capacity: usize,
    /// Ended sessions kept for listing. Default: 100.
    pub max_ended_sessions: usize,
    /// Silence after which an attached agent is reported detached. Default: 5000.
    pub agent_heartbeat_timeout_ms: u64,
    /// Root of the proc filesystem. Default: "/proc".
    pub proc_path: PathBuf,
    pub samplers: SamplerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            event_capacity: 10_000,
            group_capacity: 5_000,
            max_ended_sessions: 100,
            agent_heartbeat_timeout_ms: 5_000,
            proc_path: PathBuf::from("/proc"),
            samplers: SamplerConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Loads and validates a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: DaemonConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        if self.group_capacity == 0 {
            return Err(ConfigError::Invalid("group_capacity must be positive".into()));
        }
        self.samplers.validate()
    }

    pub fn agent_heartbeat_timeout_ns(&self) -> i64 {
        i64::try_from(Duration::from_millis(self.agent_heartbeat_timeout_ms).as_nanos()).unwrap_or(i64::MAX)
    }
}

/// Which samplers a session runs, and how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub cpu_usage: bool,
    pub cpu_threads: bool,
    pub memory_usage: bool,
    /// Network speed and connection count.
    pub network: bool,
    pub agent_status: bool,
    pub cpu_interval_ms: u64,
    pub memory_interval_ms: u64,
    pub network_interval_ms: u64,
    pub agent_interval_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cpu_usage: true,
            cpu_threads: true,
            memory_usage: true,
            network: true,
            agent_status: true,
            cpu_interval_ms: 500,
            memory_interval_ms: 500,
            network_interval_ms: 500,
            agent_interval_ms: 1_000,
        }
    }
}

impl SamplerConfig {
    /// No samplers at all. Sessions still emit their start and end events.
    pub fn disabled() -> Self {
        Self {
            cpu_usage: false,
            cpu_threads: false,
            memory_usage: false,
            network: false,
            agent_status: false,
            ..Self::default()
        }
    }

    pub fn cpu_interval(&self) -> Duration {
        Duration::from_millis(self.cpu_interval_ms)
    }

    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval_ms)
    }

    pub fn network_interval(&self) -> Duration {
        Duration::from_millis(self.network_interval_ms)
    }

    pub fn agent_interval(&self) -> Duration {
        Duration::from_millis(self.agent_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("cpu_interval_ms", self.cpu_interval_ms),
            ("memory_interval_ms", self.memory_interval_ms),
            ("network_interval_ms", self.network_interval_ms),
            ("agent_interval_ms", self.agent_interval_ms),
        ];
        match intervals.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("samplers.{} must be positive", name))),
            None => Ok(()),
        }
    }
}
