//! Queue item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl QueueStatus {
    /// Completed or Failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of work on the shared queue.
///
/// `assigned_to` and `claimed_at` are set exactly when the item is
/// `InProgress`; `completed_at` is set exactly when it is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub description: String,
    pub status: QueueStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub result: Option<String>,
    /// Higher values are claimed first.
    #[serde(default)]
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// A fresh pending item with an 8-character id.
    pub fn new(description: impl Into<String>, depends_on: Vec<String>, priority: i64) -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            description: description.into(),
            status: QueueStatus::Pending,
            assigned_to: None,
            depends_on,
            result: None,
            priority,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        }
    }

    pub(crate) fn mark_claimed(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = QueueStatus::InProgress;
        self.assigned_to = Some(worker_id.to_string());
        self.claimed_at = Some(now);
    }

    pub(crate) fn mark_released(&mut self) {
        self.status = QueueStatus::Pending;
        self.assigned_to = None;
        self.claimed_at = None;
    }

    pub(crate) fn mark_finished(&mut self, status: QueueStatus, result: Option<String>) {
        self.status = status;
        self.result = result;
        self.assigned_to = None;
        self.claimed_at = None;
        self.completed_at = Some(Utc::now());
    }

    /// Whether this item was claimed longer ago than `timeout` at `now`.
    pub(crate) fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status == QueueStatus::InProgress
            && self.claimed_at.is_some_and(|claimed| now - claimed > timeout)
    }
}
