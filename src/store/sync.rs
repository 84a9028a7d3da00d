use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;

use super::{DocumentStore, StoreError};
use crate::models::{SyncEntry, SyncStatus};

/// The document sync queue: one entry per external-artifact sync request.
pub struct SyncStore {
    inner: DocumentStore<SyncEntry>,
}

impl SyncStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            inner: DocumentStore::new(path),
        }
    }

    pub fn append(&self, entry: SyncEntry) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            if map.contains_key(&entry.key) {
                return Err(StoreError::DuplicateId(entry.key.clone()));
            }
            map.insert(entry.key.clone(), entry);
            Ok(())
        })
    }

    pub fn read_all(&self) -> Result<BTreeMap<String, SyncEntry>, StoreError> {
        self.inner.snapshot()
    }

    pub fn get(&self, key: &str) -> Result<Option<SyncEntry>, StoreError> {
        Ok(self.inner.snapshot()?.remove(key))
    }

    /// Optimistically-checked status transition, mirroring the queue store's
    /// contract: a mismatched current status fails with `StaleTransition`.
    pub fn update_status(
        &self,
        key: &str,
        from: SyncStatus,
        to: SyncStatus,
        apply: impl FnOnce(&mut SyncEntry),
    ) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            let entry = map
                .get_mut(key)
                .ok_or_else(|| StoreError::UnknownEntry(key.to_string()))?;
            if entry.status != from {
                return Err(StoreError::StaleTransition {
                    id: key.to_string(),
                    expected: from.to_string(),
                    actual: entry.status.to_string(),
                });
            }
            entry.status = to;
            entry.updated_at = Some(Utc::now());
            apply(entry);
            Ok(())
        })
    }

    /// Unconditional field update used by the sync action's error path.
    pub fn mark_error(&self, key: &str, message: String) -> Result<(), StoreError> {
        self.inner.mutate(|map| {
            let entry = map
                .get_mut(key)
                .ok_or_else(|| StoreError::UnknownEntry(key.to_string()))?;
            entry.status = SyncStatus::Error;
            entry.error = Some(message);
            entry.updated_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Operator retry: put an errored entry back in line.
    pub fn requeue(&self, key: &str) -> Result<(), StoreError> {
        self.update_status(key, SyncStatus::Error, SyncStatus::Queued, |entry| {
            entry.error = None;
        })
    }
}
