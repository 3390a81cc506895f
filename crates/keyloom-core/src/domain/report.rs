//! TaskReport: what the completion signal carries.

use serde::Serialize;

use super::ids::TaskId;
use super::status::StatusCode;
use crate::error::Diagnostic;

/// Terminal summary of one task.
///
/// Faults are recorded here instead of propagating: a failed operation
/// reports a non-success status and a readable summary, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub name: String,
    pub status: StatusCode,
    pub callback_invoked: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runnable_fault: Option<Diagnostic>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_fault: Option<Diagnostic>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub marshal_fault: Option<String>,
}

impl TaskReport {
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.task_id, self.name)
    }

    pub fn has_fault(&self) -> bool {
        self.runnable_fault.is_some() || self.callback_fault.is_some() || self.marshal_fault.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success() && !self.has_fault()
    }

    /// One human-readable line (plus fault details) for status boards and logs.
    pub fn summary(&self) -> String {
        let mut text = format!("task {} finished with status {}", self.full_id(), self.status);
        if let Some(fault) = &self.runnable_fault {
            text.push_str(&format!("; runnable fault: {fault}"));
        }
        if let Some(fault) = &self.callback_fault {
            text.push_str(&format!("; callback fault: {fault}"));
        }
        if let Some(fault) = &self.marshal_fault {
            text.push_str(&format!("; callback not delivered: {fault}"));
        }
        text
    }
}
