use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One external-artifact synchronization request.
///
/// A `(title, collection)` pair maps to at most one `remote_id` over the
/// entry's lifetime: re-processing an already-processed entry must never
/// create a second remote artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    pub key: String,
    pub title: String,
    pub source_file: String,
    pub collection: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncEntry {
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        source_file: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            source_file: source_file.into(),
            collection: collection.into(),
            status: SyncStatus::Queued,
            remote_id: None,
            error: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Queued,
    Processed,
    Update,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Queued => write!(f, "queued"),
            SyncStatus::Processed => write!(f, "processed"),
            SyncStatus::Update => write!(f, "update"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

impl SyncStatus {
    /// Entries the sync action will pick up on the next pass.
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncStatus::Queued | SyncStatus::Update)
    }
}
