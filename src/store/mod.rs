//! Durable JSON document stores.
//!
//! Each store is a single JSON document mapping keys to records. All writes
//! are whole-file atomic replaces (temp file + rename), so a reader never
//! observes a record mid-mutation. Read-modify-write sequences additionally
//! hold an exclusive flock on a sidecar file; the session lock is the primary
//! exclusion mechanism for draining, the store lock and the optimistic
//! status preconditions are defense in depth.

mod document;
pub mod queue;
pub mod sync;

pub use document::DocumentStore;
pub use queue::QueueStore;
pub use sync::SyncStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("duplicate of live entry '{existing_id}' with the same description")]
    DuplicateDescription { existing_id: String },

    #[error("unknown entry '{0}'")]
    UnknownEntry(String),

    #[error("stale transition for '{id}': expected status {expected}, found {actual}")]
    StaleTransition {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid transition for '{id}': {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
