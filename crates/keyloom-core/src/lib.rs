//! keyloom-core
//!
//! Task runner core for an OpenPGP front-end: one-shot deferred tasks whose
//! runnable executes off the interactive context and whose callback is
//! delivered back to the context that created them.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, data_object, state, report, crypto）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, CryptoEngine）
//! - **app**: タスク機構（context, task, runner, builder, operation）
//! - **impls**: 実装（InMemoryEngine など開発用）
//! - **config**: TOML 設定
//! - **observability**: ログ初期化とランナー統計
//! - **error**: エラー型と Diagnostic

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use crate::app::{
    App, AppBuilder, Completion, ContextHandle, EventLoop, Task, TaskBuilder, TaskHandle,
    TaskRunner,
};
pub use crate::config::LoomConfig;
pub use crate::domain::{DataObject, DataObjectPtr, StatusCode, TaskId, TaskReport};
pub use crate::error::{Diagnostic, LoomError};
