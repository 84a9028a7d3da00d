use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::{DocumentStore, StoreError};
use crate::models::{QueueEntry, TaskStatus};

/// The durable task queue: single source of truth for pending, in-flight,
/// and completed work.
///
/// The dispatcher only ever reads this store. The queued -> in_progress
/// transition happens exclusively through [`QueueStore::claim_queued`],
/// called by a session executor holding the drain lock.
pub struct QueueStore {
    inner: DocumentStore<QueueEntry>,
}

impl QueueStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            inner: DocumentStore::new(path),
        }
    }

    /// Append a new entry with status `queued`.
    ///
    /// Rejects an already-used id, and also a description identical to a
    /// live (queued or in-progress) entry, which is the usual symptom of a
    /// producer retrying a request it already made.
    pub fn append(&self, entry: QueueEntry) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            if map.contains_key(&entry.id) {
                return Err(StoreError::DuplicateId(entry.id.clone()));
            }
            if let Some(existing) = map.values().find(|e| {
                e.description == entry.description && !e.status.is_terminal()
            }) {
                return Err(StoreError::DuplicateDescription {
                    existing_id: existing.id.clone(),
                });
            }
            map.insert(entry.id.clone(), entry);
            Ok(())
        })
    }

    /// Full snapshot of the queue document.
    pub fn read_all(&self) -> Result<BTreeMap<String, QueueEntry>, StoreError> {
        self.inner.snapshot()
    }

    pub fn get(&self, id: &str) -> Result<Option<QueueEntry>, StoreError> {
        Ok(self.inner.snapshot()?.remove(id))
    }

    /// Count entries eligible for claiming. Read-only.
    pub fn count_queued(&self) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .snapshot()?
            .values()
            .filter(|e| e.status == TaskStatus::Queued)
            .count())
    }

    /// Atomically transition every queued entry (optionally one batch) to
    /// in_progress, stamping `started_at`.
    ///
    /// Returns the claimed entries in stable insertion order (created_at,
    /// then id). Must only be called by a session executor holding the
    /// drain lock.
    pub fn claim_queued(&self, batch_id: Option<&str>) -> Result<Vec<QueueEntry>, StoreError> {
        let now = Utc::now();
        self.inner.mutate(|map| {
            let mut claimed = Vec::new();
            for entry in map.values_mut() {
                if entry.status != TaskStatus::Queued {
                    continue;
                }
                if let Some(batch) = batch_id {
                    if entry.batch_id.as_deref() != Some(batch) {
                        continue;
                    }
                }
                entry.status = TaskStatus::InProgress;
                entry.started_at = Some(now);
                claimed.push(entry.clone());
            }
            claimed.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
            Ok(claimed)
        })
    }

    /// Optimistically-checked status transition.
    ///
    /// Fails with `StaleTransition` when the entry's current status is not
    /// `from` - the signal that another session already moved it.
    pub fn update_status(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
        apply: impl FnOnce(&mut QueueEntry),
    ) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            let entry = map
                .get_mut(id)
                .ok_or_else(|| StoreError::UnknownEntry(id.to_string()))?;
            if entry.status != from {
                return Err(StoreError::StaleTransition {
                    id: id.to_string(),
                    expected: from.to_string(),
                    actual: entry.status.to_string(),
                });
            }
            if !from.can_transition_to(&to) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            entry.status = to;
            apply(entry);
            Ok(())
        })
    }

    /// Record a successful result for an in-flight entry.
    pub fn complete(&self, id: &str, result: String) -> Result<(), StoreError> {
        self.update_status(id, TaskStatus::InProgress, TaskStatus::Done, |entry| {
            entry.completed_at = Some(Utc::now());
            entry.result = Some(result);
        })
    }

    /// Record a failure for an in-flight entry.
    pub fn fail(&self, id: &str, error: String) -> Result<(), StoreError> {
        self.update_status(id, TaskStatus::InProgress, TaskStatus::Error, |entry| {
            entry.completed_at = Some(Utc::now());
            entry.result = Some(format!("failed: {error}"));
            entry.error = Some(error);
        })
    }

    /// Cancel a live entry. Terminal entries cannot be cancelled.
    pub fn cancel(&self, id: &str) -> Result<TaskStatus, StoreError> {
        self.inner.mutate(|map| {
            let entry = map
                .get_mut(id)
                .ok_or_else(|| StoreError::UnknownEntry(id.to_string()))?;
            let previous = entry.status;
            if previous.is_terminal() {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: previous.to_string(),
                    to: TaskStatus::Error.to_string(),
                });
            }
            entry.status = TaskStatus::Error;
            entry.completed_at = Some(Utc::now());
            entry.error = Some("cancelled by operator".to_string());
            Ok(previous)
        })
    }

    /// Reset a single in-flight or failed entry back to queued, clearing its
    /// execution record so the next session re-claims it from scratch.
    pub fn reset(&self, id: &str) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            let entry = map
                .get_mut(id)
                .ok_or_else(|| StoreError::UnknownEntry(id.to_string()))?;
            if !entry.status.can_transition_to(&TaskStatus::Queued) {
                return Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from: entry.status.to_string(),
                    to: TaskStatus::Queued.to_string(),
                });
            }
            entry.status = TaskStatus::Queued;
            entry.started_at = None;
            entry.completed_at = None;
            entry.result = None;
            entry.error = None;
            Ok(())
        })
    }

    /// Recovery sweep: return in-progress entries older than `max_age` to
    /// queued. This is the documented fix for work orphaned by a session
    /// that died between claiming and finalizing.
    pub fn reset_stuck(&self, max_age: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::seconds(0));
        self.inner.mutate(|map| {
            let mut reset = Vec::new();
            for entry in map.values_mut() {
                if entry.status != TaskStatus::InProgress {
                    continue;
                }
                let started = entry.started_at.unwrap_or(entry.created_at);
                if started < cutoff {
                    warn!(id = %entry.id, started = %started, "resetting stuck entry");
                    entry.status = TaskStatus::Queued;
                    entry.started_at = None;
                    reset.push(entry.id.clone());
                }
            }
            Ok(reset)
        })
    }

    /// Move terminal entries older than `older_than` into the archive store,
    /// preserving the full record. Maintenance, not a core transition.
    pub fn archive_terminal(
        &self,
        older_than: Duration,
        archive_path: &PathBuf,
    ) -> Result<usize, StoreError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(older_than)
                .unwrap_or_else(|_| ChronoDuration::seconds(0));
        let archive: DocumentStore<QueueEntry> = DocumentStore::new(archive_path);

        let to_archive = self.inner.mutate(|map| {
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, e)| e.status.is_terminal() && terminal_time(e) < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            let mut moved = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(entry) = map.remove(&id) {
                    moved.push(entry);
                }
            }
            Ok(moved)
        })?;

        if to_archive.is_empty() {
            return Ok(0);
        }

        let count = to_archive.len();
        archive.mutate(|map| {
            for entry in to_archive {
                map.insert(entry.id.clone(), entry);
            }
            Ok(())
        })?;
        info!(count, "archived terminal entries");
        Ok(count)
    }
}

fn terminal_time(entry: &QueueEntry) -> DateTime<Utc> {
    entry.completed_at.unwrap_or(entry.created_at)
}
