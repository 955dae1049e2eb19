//! Worker lifecycle status and the finalized result record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::AgentResponse;

/// Status of one worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Submitted, waiting for a permit.
    Pending,
    /// Holding a permit.
    Running,
    Completed,
    Error,
    /// Deadline expired; the agent was stopped.
    Timeout,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one worker run, finalized once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub response: String,
    pub error: Option<String>,
    pub model_used: String,
    pub tokens_used: Option<u64>,
    pub tool_uses: Vec<String>,
    pub duration_seconds: f64,
}

impl WorkerResult {
    /// Empty result in the `Pending` state.
    pub fn pending(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            status: WorkerStatus::Pending,
            response: String::new(),
            error: None,
            model_used: String::new(),
            tokens_used: None,
            tool_uses: Vec::new(),
            duration_seconds: 0.0,
        }
    }

    pub fn completed(worker_id: impl Into<String>, response: AgentResponse, elapsed: Duration) -> Self {
        Self {
            status: WorkerStatus::Completed,
            response: response.text,
            model_used: response.model_used,
            tokens_used: response.tokens_used,
            tool_uses: response.tool_uses,
            duration_seconds: elapsed.as_secs_f64(),
            ..Self::pending(worker_id)
        }
    }

    pub fn error(worker_id: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: WorkerStatus::Error,
            error: Some(error.into()),
            duration_seconds: elapsed.as_secs_f64(),
            ..Self::pending(worker_id)
        }
    }

    pub fn timed_out(worker_id: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            status: WorkerStatus::Timeout,
            error: Some(error.into()),
            duration_seconds: elapsed.as_secs_f64(),
            ..Self::pending(worker_id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Completed
    }
}

/// Render a deadline the way timeout messages show it (`300`, `0.5`).
pub(crate) fn format_secs(duration: Duration) -> String {
    duration.as_secs_f64().to_string()
}
