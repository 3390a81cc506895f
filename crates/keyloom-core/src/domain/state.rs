//! State - タスクのライフサイクル状態

use serde::{Deserialize, Serialize};

/// TaskState はタスクのライフサイクルを表現
///
/// # 状態遷移
/// - Created -> Dispatched -> RunnableExecuting -> RunnableDone
/// - RunnableDone -> CallbackExecuting -> Completed
/// - RunnableDone -> Completed（callback なし、または配送失敗）
///
/// リトライ状態はありません。失敗した runnable も非ゼロの status で RunnableDone に進みます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Dispatched,
    RunnableExecuting,
    RunnableDone,
    CallbackExecuting,
    Completed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed)
    }

    /// Has the runnable returned (or been skipped)?
    pub fn runnable_finished(self) -> bool {
        matches!(
            self,
            TaskState::RunnableDone | TaskState::CallbackExecuting | TaskState::Completed
        )
    }
}
