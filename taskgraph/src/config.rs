//! Configuration for the runner, the reader cache and logging.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Reader cache settings.
    #[serde(default)]
    pub readers: ReaderManagerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parses a JSON configuration document. Missing sections and fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is malformed.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Configuration for pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of task executions in flight at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Timeout applied to tasks that do not set their own, in milliseconds.
    /// Zero disables it.
    #[serde(default)]
    pub default_task_timeout_ms: u64,
}

fn default_max_concurrent_tasks() -> usize {
    64
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_task_timeout_ms: 0,
        }
    }
}

impl RunnerConfig {
    /// Creates a runner configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    /// Sets the default task timeout.
    #[must_use]
    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Gets the default task timeout, if any.
    #[must_use]
    pub fn default_task_timeout(&self) -> Option<Duration> {
        (self.default_task_timeout_ms > 0)
            .then(|| Duration::from_millis(self.default_task_timeout_ms))
    }
}

/// Configuration for the reader cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderManagerConfig {
    /// How often the eviction sweep runs, in milliseconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,
    /// How long a reader may go unused before it is evicted, in milliseconds.
    #[serde(default = "default_eviction_timeout")]
    pub eviction_timeout_ms: u64,
}

fn default_check_interval() -> u64 {
    60_000
}

fn default_eviction_timeout() -> u64 {
    5 * 60_000
}

impl Default for ReaderManagerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            eviction_timeout_ms: default_eviction_timeout(),
        }
    }
}

impl ReaderManagerConfig {
    /// Creates a reader cache configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the eviction timeout.
    #[must_use]
    pub fn with_eviction_timeout(mut self, timeout: Duration) -> Self {
        self.eviction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Gets the sweep interval as Duration.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Gets the eviction timeout as Duration.
    #[must_use]
    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `taskgraph=debug`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}
