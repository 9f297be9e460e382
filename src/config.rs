//! # Config — Service Settings
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional TOML file (`--config` / `HASHREACH_CONFIG`).
//! 3. `HASHREACH_*` environment variables (a `.env` file is loaded first by `main`).
//!
//! ```toml
//! port = 8000
//! max_length_ceiling = 8
//! default_charset = "abcdefghijklmnopqrstuvwxyz0123456789"
//! progress_every = 1000
//! time_budget_secs = 600
//! mailbox_capacity = 4096
//! subscriber_capacity = 8192
//! max_active_tasks = 0
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::engine::{EngineConfig, DEFAULT_PROGRESS_EVERY, DEFAULT_TIME_BUDGET};
use crate::error::ConfigError;

pub const DEFAULT_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen port for `serve`.
    pub port: u16,
    /// Submissions asking for longer candidates are clamped to this.
    pub max_length_ceiling: usize,
    /// Charset used when a submission omits one.
    pub default_charset: String,
    /// Attempts between PROGRESS events.
    pub progress_every: u64,
    /// Wall-clock safety budget per run.
    pub time_budget_secs: u64,
    /// Events buffered per task while nobody is subscribed.
    pub mailbox_capacity: usize,
    /// Queue depth per subscriber before it is evicted as too slow.
    pub subscriber_capacity: usize,
    /// Concurrent running tasks allowed; 0 means unbounded.
    pub max_active_tasks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8000,
            max_length_ceiling: 8,
            default_charset: DEFAULT_CHARSET.to_string(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            time_budget_secs: DEFAULT_TIME_BUDGET.as_secs(),
            mailbox_capacity: 4096,
            subscriber_capacity: 8192,
            max_active_tasks: 0,
        }
    }
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!(var = name, value = %raw, "ignoring unparsable config override"),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` if given, then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        env_override("HASHREACH_PORT", &mut self.port);
        env_override("HASHREACH_MAX_LENGTH_CEILING", &mut self.max_length_ceiling);
        env_override("HASHREACH_DEFAULT_CHARSET", &mut self.default_charset);
        env_override("HASHREACH_PROGRESS_EVERY", &mut self.progress_every);
        env_override("HASHREACH_TIME_BUDGET_SECS", &mut self.time_budget_secs);
        env_override("HASHREACH_MAILBOX_CAPACITY", &mut self.mailbox_capacity);
        env_override("HASHREACH_SUBSCRIBER_CAPACITY", &mut self.subscriber_capacity);
        env_override("HASHREACH_MAX_ACTIVE_TASKS", &mut self.max_active_tasks);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_length_ceiling == 0 {
            return Err(ConfigError::Invalid {
                field: "max_length_ceiling",
                reason: "must be at least 1".into(),
            });
        }
        if self.default_charset.is_empty() {
            return Err(ConfigError::Invalid {
                field: "default_charset",
                reason: "must not be empty".into(),
            });
        }
        if self.progress_every == 0 {
            return Err(ConfigError::Invalid {
                field: "progress_every",
                reason: "must be at least 1".into(),
            });
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "mailbox_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.subscriber_capacity < self.mailbox_capacity {
            return Err(ConfigError::Invalid {
                field: "subscriber_capacity",
                reason: format!(
                    "{} is smaller than mailbox_capacity {}; a full replay would not fit",
                    self.subscriber_capacity, self.mailbox_capacity
                ),
            });
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            progress_every: self.progress_every,
            time_budget: Duration::from_secs(self.time_budget_secs),
        }
    }
}
