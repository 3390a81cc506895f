//! AppBuilder - ランナー群の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 1 つの tokio runtime と 1 つの IdGenerator を全ランナーで共有する

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::info;

use super::runner::{TaskRunner, build_runtime, stop_runtime};
use crate::config::{LoomConfig, RunnerConfig};
use crate::error::LoomError;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

/// Named runners an application wires. Each kind isolates one class of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Default,
    Gpg,
    Io,
    Network,
    External,
}

impl RunnerKind {
    pub const ALL: [RunnerKind; 5] = [
        RunnerKind::Default,
        RunnerKind::Gpg,
        RunnerKind::Io,
        RunnerKind::Network,
        RunnerKind::External,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Default => "default",
            RunnerKind::Gpg => "gpg",
            RunnerKind::Io => "io",
            RunnerKind::Network => "network",
            RunnerKind::External => "external",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AppBuilder はランナー群を構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .runner(RunnerKind::Default)?
///     .runner(RunnerKind::Gpg)?
///     .expect_runners(&[RunnerKind::Gpg])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 同じ kind の二重登録は runner() の時点でエラー
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
pub struct AppBuilder {
    config: RunnerConfig,
    ids: Option<Arc<dyn IdGenerator>>,
    kinds: Vec<RunnerKind>,
    expected: Option<Vec<RunnerKind>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("runner {0} is registered twice")]
    DuplicateRunner(RunnerKind),

    #[error("Missing runners: {0:?}. These runners were expected but not registered.")]
    MissingRunners(Vec<RunnerKind>),

    #[error(transparent)]
    Runtime(#[from] LoomError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: RunnerConfig::default(),
            ids: None,
            kinds: Vec::new(),
            expected: None,
        }
    }

    /// Runtime sizing from `config.runner`, runners from `config.runners`.
    pub fn from_config(config: &LoomConfig) -> Result<Self, BuildError> {
        let mut builder = Self::new().config(config.runner.clone());
        for kind in &config.runners {
            builder = builder.runner(*kind)?;
        }
        Ok(builder)
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a ULID generator on the system clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn runner(mut self, kind: RunnerKind) -> Result<Self, BuildError> {
        if self.kinds.contains(&kind) {
            return Err(BuildError::DuplicateRunner(kind));
        }
        self.kinds.push(kind);
        Ok(self)
    }

    pub fn expect_runners(mut self, kinds: &[RunnerKind]) -> Self {
        self.expected = Some(kinds.to_vec());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected {
            let missing: Vec<RunnerKind> = expected
                .iter()
                .filter(|kind| !self.kinds.contains(kind))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingRunners(missing));
            }
        }

        let runtime = build_runtime(&self.config)?;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let runners = self
            .kinds
            .iter()
            .map(|kind| {
                let runner =
                    TaskRunner::from_handle(kind.as_str(), runtime.handle().clone(), Arc::clone(&ids));
                (*kind, runner)
            })
            .collect();
        info!(runners = ?self.kinds, "task runners ready");

        Ok(App {
            runners,
            runtime: Mutex::new(Some(runtime)),
            config: self.config,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App はランナー群と共有 runtime を保持
pub struct App {
    runners: BTreeMap<RunnerKind, TaskRunner>,
    runtime: Mutex<Option<Runtime>>,
    config: RunnerConfig,
}

impl App {
    pub fn runner(&self, kind: RunnerKind) -> Option<&TaskRunner> {
        self.runners.get(&kind)
    }

    pub fn kinds(&self) -> Vec<RunnerKind> {
        self.runners.keys().copied().collect()
    }

    /// Close every runner, then stop the shared runtime.
    pub fn shutdown(&self) {
        for runner in self.runners.values() {
            runner.shutdown();
        }
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            info!("shutting down shared runtime");
            stop_runtime(runtime, self.config.shutdown_timeout());
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}
