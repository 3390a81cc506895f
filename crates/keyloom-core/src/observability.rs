//! Observability - ログ初期化とランナー統計

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::domain::TaskReport;

/// Environment variable that overrides `logging.filter`.
pub const LOG_ENV: &str = "KEYLOOM_LOG";

/// Install the global fmt subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCounts {
    pub submitted: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub callbacks_invoked: usize,
}

#[derive(Debug, Default)]
pub(crate) struct RunnerStats {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    callbacks_invoked: AtomicUsize,
}

impl RunnerStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, report: &TaskReport) {
        if report.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        if report.callback_invoked {
            self.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> RunnerCounts {
        let completed = self.completed.load(Ordering::Acquire);
        let submitted = self.submitted.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        RunnerCounts {
            submitted,
            in_flight: submitted.saturating_sub(completed),
            succeeded,
            failed: completed.saturating_sub(succeeded),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
        }
    }
}
