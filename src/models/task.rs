//! Polled status of asynchronous lifecycle tasks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a dispatched task.
///
/// Submission returns immediately; clients poll the status record until
/// it reaches `Completed` or `Failed`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Starting,
    Progress,
    Completed,
    Failed,
}

/// Cumulative progress of a task, updated after every processed entry.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskStatus {
    pub state: TaskState,

    /// Number of entries the task will process, when known up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,

    /// Entries processed successfully so far.
    pub step: usize,

    /// Entries that failed and were skipped.
    pub errors: usize,

    /// PIDs resolved so far (order assembly only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<usize>,

    /// Final result document, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Human-readable failure messages, set when the task aborts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Vec<String>>,
}

impl TaskStatus {
    pub fn starting() -> Self {
        Self {
            state: TaskState::Starting,
            total: None,
            step: 0,
            errors: 0,
            verified: None,
            result: None,
            failure: None,
        }
    }
}
