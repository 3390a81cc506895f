//! App - アプリケーション層
//!
//! ports とドメイン型を組み合わせて、タスク機構そのものを実装します。
//!
//! # 主要コンポーネント
//! - **EventLoop / ContextHandle**: callback を受け取る実行コンテキスト
//! - **Task / TaskHandle / Completion**: 一度きりの遅延処理とその観測
//! - **TaskRunner**: runnable を実行する基盤
//! - **AppBuilder / App**: 名前付きランナー群のワイヤリング
//! - **OperationRunner**: OpenPGP 操作をタスクとして投入する

pub mod builder;
pub mod context;
pub mod operation;
pub mod runner;
pub mod task;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError, RunnerKind};
pub use self::context::{ContextHandle, EventLoop};
pub use self::operation::{Operation, OperationReport, OperationRunner, ReportLevel};
pub use self::runner::TaskRunner;
pub use self::task::{CallbackFn, Completion, RunnableFn, Task, TaskBuilder, TaskHandle};
