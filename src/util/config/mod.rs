//! taskweave configuration
//!
//! Pool sizing and tuning can come from a TOML file and from the environment.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (TASKWEAVE_WORKERS, TASKWEAVE_QUEUE_CAPACITY)
//! 3. Config file ($TASKWEAVE_CONFIG or --config)
//! 4. Default values
//! ```
//!
//! # Example file
//!
//! ```toml
//! [fork_join]
//! workers = 8
//! steal_strategy = "round-robin"
//!
//! [executor]
//! core_threads = 2
//! max_threads = 4
//! queue_capacity = 64
//! rejection = "caller-runs"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::runtime::executor::{ExecutorConfig, RejectionPolicy};
use crate::runtime::scheduler::{SchedulerConfig, StealStrategy};

/// Path of a config file to load when none is given explicitly.
pub const CONFIG_ENV: &str = "TASKWEAVE_CONFIG";
/// Overrides `fork_join.workers`.
pub const WORKERS_ENV: &str = "TASKWEAVE_WORKERS";
/// Overrides `executor.queue_capacity`; `unbounded` clears it.
pub const QUEUE_CAPACITY_ENV: &str = "TASKWEAVE_QUEUE_CAPACITY";

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Fork/join pool settings
    #[serde(default)]
    pub fork_join: ForkJoinSection,
    /// Thread pool executor settings
    #[serde(default)]
    pub executor: ExecutorSection,
}

/// `[fork_join]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForkJoinSection {
    /// Worker count; `None` means one per CPU
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub steal_strategy: StealStrategy,
    #[serde(default = "default_steal_retries")]
    pub steal_retries: usize,
    #[serde(default = "default_fork_join_name")]
    pub thread_name: String,
}

fn default_idle_timeout_ms() -> u64 {
    10
}

fn default_steal_retries() -> usize {
    crate::runtime::scheduler::queue::DEFAULT_STEAL_RETRIES
}

fn default_fork_join_name() -> String {
    "fj-worker".to_string()
}

impl Default for ForkJoinSection {
    fn default() -> Self {
        Self {
            workers: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            steal_strategy: StealStrategy::default(),
            steal_retries: default_steal_retries(),
            thread_name: default_fork_join_name(),
        }
    }
}

/// `[executor]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSection {
    /// Core thread count; `None` means one per CPU
    #[serde(default)]
    pub core_threads: Option<usize>,
    /// Max thread count; `None` means equal to the core count
    #[serde(default)]
    pub max_threads: Option<usize>,
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Queue capacity; absent means unbounded, 0 means hand-off
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub rejection: RejectionPolicy,
    #[serde(default = "default_executor_name")]
    pub thread_name: String,
}

fn default_keep_alive_ms() -> u64 {
    60_000
}

fn default_executor_name() -> String {
    "pool-worker".to_string()
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            core_threads: None,
            max_threads: None,
            keep_alive_ms: default_keep_alive_ms(),
            queue_capacity: None,
            rejection: RejectionPolicy::default(),
            thread_name: default_executor_name(),
        }
    }
}

impl RuntimeConfig {
    /// Load from a TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if given, else `$TASKWEAVE_CONFIG` if set, else defaults;
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.or(from_env.as_deref()) {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Save as pretty TOML.
    pub fn save_to_path(
        &self,
        path: &Path,
    ) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `TASKWEAVE_WORKERS` and `TASKWEAVE_QUEUE_CAPACITY`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(
            std::env::var(WORKERS_ENV).ok().as_deref(),
            std::env::var(QUEUE_CAPACITY_ENV).ok().as_deref(),
        )
    }

    fn apply_overrides(
        &mut self,
        workers: Option<&str>,
        queue_capacity: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = workers {
            let workers = parse_count(WORKERS_ENV, raw)?;
            self.fork_join.workers = Some(workers);
        }
        if let Some(raw) = queue_capacity {
            self.executor.queue_capacity = match raw.trim() {
                "unbounded" | "" => None,
                raw => Some(parse_count(QUEUE_CAPACITY_ENV, raw)?),
            };
        }
        Ok(())
    }

    /// Resolve the `[fork_join]` section.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let section = &self.fork_join;
        let defaults = SchedulerConfig::default();
        let num_workers = section.workers.unwrap_or(defaults.num_workers);
        if num_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "fork_join.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(SchedulerConfig {
            num_workers,
            steal_strategy: section.steal_strategy,
            steal_retries: section.steal_retries,
            idle_timeout: Duration::from_millis(section.idle_timeout_ms),
            thread_name: section.thread_name.clone(),
        })
    }

    /// Resolve the `[executor]` section.
    pub fn executor_config(&self) -> Result<ExecutorConfig, ConfigError> {
        let section = &self.executor;
        let defaults = ExecutorConfig::default();
        let core_threads = section.core_threads.unwrap_or(defaults.core_threads);
        let max_threads = section.max_threads.unwrap_or(core_threads.max(1));
        if core_threads > max_threads {
            return Err(ConfigError::Invalid {
                field: "executor.max_threads",
                reason: format!("{} is below core_threads {}", max_threads, core_threads),
            });
        }
        Ok(ExecutorConfig {
            core_threads,
            max_threads,
            keep_alive: Duration::from_millis(section.keep_alive_ms),
            queue_capacity: section.queue_capacity,
            rejection: section.rejection,
            thread_name: section.thread_name.clone(),
        })
    }
}

fn parse_count(
    field: &'static str,
    raw: &str,
) -> Result<usize, ConfigError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|err| ConfigError::Invalid {
            field,
            reason: err.to_string(),
        })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
