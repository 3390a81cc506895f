//! Config - TOML 設定
//!
//! ```toml
//! runners = ["default", "gpg"]
//!
//! [runner]
//! worker_threads = 2
//! max_blocking_threads = 64
//! thread_name = "keyloom-worker"
//! shutdown_timeout_ms = 5000
//!
//! [logging]
//! filter = "info"
//! with_target = false
//! ```
//!
//! 全フィールドにデフォルトがあるので、空のファイルでも有効です。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::RunnerKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
    /// Runner kinds the application expects to be wired.
    pub runners: Vec<RunnerKind>,
}

impl LoomConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: LoomConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runner.validate()?;
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must not be empty".into()));
        }
        let mut seen = Vec::with_capacity(self.runners.len());
        for kind in &self.runners {
            if seen.contains(kind) {
                return Err(ConfigError::Invalid(format!("runner {kind} listed twice")));
            }
            seen.push(*kind);
        }
        Ok(())
    }
}

/// Worker runtime sizing. Runnables run on the blocking pool, so
/// `max_blocking_threads` bounds how many run at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub worker_threads: usize,
    pub max_blocking_threads: usize,
    pub thread_name: String,
    pub shutdown_timeout_ms: u64,
}

impl RunnerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("runner.worker_threads must be at least 1".into()));
        }
        if self.max_blocking_threads == 0 {
            return Err(ConfigError::Invalid(
                "runner.max_blocking_threads must be at least 1".into(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("runner.thread_name must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 64,
            thread_name: "keyloom-worker".to_string(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"keyloom_core=debug"`.
    pub filter: String,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: false,
        }
    }
}
