use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of requested work in the durable queue.
///
/// The `description` and `result` payloads are opaque to the core: they are
/// carried verbatim to and from the external capability and never parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueEntry {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Queued,
            batch_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Done,
    Error,
    Update,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Update => write!(f, "update"),
        }
    }
}

impl TaskStatus {
    /// Check if transitioning from the current status to the new status is valid.
    ///
    /// Valid transitions:
    /// - `Queued` -> `InProgress` (claiming, executor only)
    /// - `InProgress` -> `Done` | `Error` | `Queued` (the last via stuck-entry recovery)
    /// - `Update` -> `InProgress`
    /// - `Error` -> `Queued` (operator retry)
    ///
    /// `Done` has no outgoing transitions.
    pub fn can_transition_to(&self, new_status: &TaskStatus) -> bool {
        if self == new_status {
            return true;
        }

        match self {
            TaskStatus::Queued => matches!(new_status, TaskStatus::InProgress | TaskStatus::Error),
            TaskStatus::InProgress => matches!(
                new_status,
                TaskStatus::Done | TaskStatus::Error | TaskStatus::Queued
            ),
            TaskStatus::Update => matches!(new_status, TaskStatus::InProgress),
            TaskStatus::Error => matches!(new_status, TaskStatus::Queued),
            TaskStatus::Done => false,
        }
    }

    /// Attempt to transition to a new status, returning an error if invalid.
    pub fn try_transition(&self, new_status: TaskStatus) -> Result<TaskStatus> {
        if self.can_transition_to(&new_status) {
            Ok(new_status)
        } else {
            bail!("Invalid task status transition: {self} -> {new_status}")
        }
    }

    /// Terminal entries are eligible for archival and never re-claimed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}
