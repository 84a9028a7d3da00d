//! Idempotent document sync actions.
//!
//! Every action here may run twice for the same logical change (the
//! automation loop is restartable and can replay a stale snapshot), so
//! creation is always preceded by a remote lookup: an artifact that already
//! exists under the same (title, collection) is adopted, never duplicated.

mod remote;

pub use remote::HttpLibrary;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::models::SyncStatus;
use crate::store::{StoreError, SyncStore};

/// External artifact service boundary.
pub trait RemoteLibrary {
    fn find_by_title(&self, title: &str, collection: &str) -> Result<Option<String>>;
    fn create(&self, title: &str, collection: &str, content: &str) -> Result<String>;
    fn update(&self, id: &str, content: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { remote_id: String },
    Updated { remote_id: String },
    /// The idempotency lookup found an existing artifact. Informational,
    /// not an error.
    DuplicateAvoided { remote_id: String },
    /// The entry moved to error status with this message. Not retried
    /// automatically; an operator requeues it.
    Failed { message: String },
}

/// Create or update the remote artifact for one sync entry.
///
/// `content_root` anchors the entry's `source_file` path.
pub fn create_or_update(
    store: &SyncStore,
    key: &str,
    remote: &dyn RemoteLibrary,
    content_root: &Path,
) -> Result<SyncOutcome> {
    let entry = store
        .get(key)?
        .ok_or_else(|| anyhow::anyhow!("Unknown sync entry '{key}'"))?;

    if !entry.status.is_pending() {
        // Already processed (or errored): nothing to do. Keeps replays safe.
        return Ok(SyncOutcome::DuplicateAvoided {
            remote_id: entry.remote_id.unwrap_or_default(),
        });
    }

    let source = content_root.join(&entry.source_file);
    let content = match fs::read_to_string(&source) {
        Ok(content) => content,
        Err(e) => {
            let message = format!("cannot read source file {}: {e}", source.display());
            store.mark_error(key, message.clone())?;
            return Ok(SyncOutcome::Failed { message });
        }
    };

    let result = match (&entry.remote_id, entry.status) {
        // Existing artifact flagged for update.
        (Some(remote_id), SyncStatus::Update) => remote
            .update(remote_id, &content)
            .map(|()| SyncOutcome::Updated {
                remote_id: remote_id.clone(),
            }),
        // No remote yet: look before creating.
        _ => match remote.find_by_title(&entry.title, &entry.collection) {
            Ok(Some(existing_id)) => {
                info!(key, remote_id = %existing_id, "adopting existing remote artifact");
                Ok(SyncOutcome::DuplicateAvoided {
                    remote_id: existing_id,
                })
            }
            Ok(None) => remote
                .create(&entry.title, &entry.collection, &content)
                .map(|remote_id| SyncOutcome::Created { remote_id }),
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(outcome) => {
            let remote_id = match &outcome {
                SyncOutcome::Created { remote_id }
                | SyncOutcome::Updated { remote_id }
                | SyncOutcome::DuplicateAvoided { remote_id } => remote_id.clone(),
                SyncOutcome::Failed { .. } => unreachable!(),
            };
            let mark = store.update_status(key, entry.status, SyncStatus::Processed, |e| {
                e.remote_id = Some(remote_id);
                e.error = None;
            });
            match mark {
                Ok(()) => Ok(outcome),
                // Someone else already finished this entry: the artifact
                // exists exactly once either way.
                Err(StoreError::StaleTransition { .. }) => {
                    warn!(key, "sync entry finished concurrently, dropping transition");
                    Ok(outcome)
                }
                Err(e) => Err(e).context("Failed to mark sync entry processed"),
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            store.mark_error(key, message.clone())?;
            warn!(key, error = %message, "sync action failed");
            Ok(SyncOutcome::Failed { message })
        }
    }
}

/// Run `create_or_update` for every pending entry, in key order.
pub fn process_pending(
    store: &SyncStore,
    remote: &dyn RemoteLibrary,
    content_root: &Path,
) -> Result<Vec<(String, SyncOutcome)>> {
    let pending: Vec<String> = store
        .read_all()?
        .into_iter()
        .filter(|(_, e)| e.status.is_pending())
        .map(|(key, _)| key)
        .collect();

    let mut outcomes = Vec::with_capacity(pending.len());
    for key in pending {
        let outcome = create_or_update(store, &key, remote, content_root)?;
        outcomes.push((key, outcome));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncEntry;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// In-memory remote with create/update counters.
    #[derive(Default)]
    struct MockRemote {
        // (title, collection) -> id
        docs: RefCell<HashMap<(String, String), String>>,
        creates: RefCell<usize>,
        updates: RefCell<usize>,
        fail_next: RefCell<bool>,
    }

    impl RemoteLibrary for MockRemote {
        fn find_by_title(&self, title: &str, collection: &str) -> Result<Option<String>> {
            if *self.fail_next.borrow() {
                anyhow::bail!("remote unreachable");
            }
            Ok(self
                .docs
                .borrow()
                .get(&(title.to_string(), collection.to_string()))
                .cloned())
        }

        fn create(&self, title: &str, collection: &str, _content: &str) -> Result<String> {
            *self.creates.borrow_mut() += 1;
            let id = format!("R{}", self.creates.borrow());
            self.docs
                .borrow_mut()
                .insert((title.to_string(), collection.to_string()), id.clone());
            Ok(id)
        }

        fn update(&self, _id: &str, _content: &str) -> Result<()> {
            *self.updates.borrow_mut() += 1;
            Ok(())
        }
    }

    fn fixture(temp: &TempDir) -> SyncStore {
        fs::write(temp.path().join("doc1.md"), "# Doc1 body").unwrap();
        SyncStore::new(temp.path().join("sync.json"))
    }

    #[test]
    fn test_create_then_replay_avoids_duplicate() {
        let temp = TempDir::new().unwrap();
        let store = fixture(&temp);
        let remote = MockRemote::default();

        store
            .append(SyncEntry::new("k1", "Doc1", "doc1.md", "Inbox"))
            .unwrap();

        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Created {
                remote_id: "R1".to_string()
            }
        );
        assert_eq!(store.get("k1").unwrap().unwrap().status, SyncStatus::Processed);

        // Second run for the same logical change: no second artifact.
        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::DuplicateAvoided { .. }));
        assert_eq!(*remote.creates.borrow(), 1);
        assert_eq!(
            store.get("k1").unwrap().unwrap().remote_id.as_deref(),
            Some("R1")
        );
    }

    #[test]
    fn test_adopts_preexisting_remote_artifact() {
        let temp = TempDir::new().unwrap();
        let store = fixture(&temp);
        let remote = MockRemote::default();
        remote
            .docs
            .borrow_mut()
            .insert(("Doc1".to_string(), "Inbox".to_string()), "R9".to_string());

        store
            .append(SyncEntry::new("k1", "Doc1", "doc1.md", "Inbox"))
            .unwrap();

        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::DuplicateAvoided {
                remote_id: "R9".to_string()
            }
        );
        assert_eq!(*remote.creates.borrow(), 0);
        assert_eq!(
            store.get("k1").unwrap().unwrap().remote_id.as_deref(),
            Some("R9")
        );
    }

    #[test]
    fn test_update_path_uses_existing_remote_id() {
        let temp = TempDir::new().unwrap();
        let store = fixture(&temp);
        let remote = MockRemote::default();

        store
            .append(SyncEntry::new("k1", "Doc1", "doc1.md", "Inbox"))
            .unwrap();
        create_or_update(&store, "k1", &remote, temp.path()).unwrap();

        // Flag for update, as a rule would after the source file changes.
        store
            .update_status("k1", SyncStatus::Processed, SyncStatus::Update, |_| {})
            .unwrap();

        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                remote_id: "R1".to_string()
            }
        );
        assert_eq!(*remote.creates.borrow(), 1);
        assert_eq!(*remote.updates.borrow(), 1);
        assert_eq!(store.get("k1").unwrap().unwrap().status, SyncStatus::Processed);
    }

    #[test]
    fn test_remote_failure_sets_error_no_retry() {
        let temp = TempDir::new().unwrap();
        let store = fixture(&temp);
        let remote = MockRemote::default();
        *remote.fail_next.borrow_mut() = true;

        store
            .append(SyncEntry::new("k1", "Doc1", "doc1.md", "Inbox"))
            .unwrap();

        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));

        let entry = store.get("k1").unwrap().unwrap();
        assert_eq!(entry.status, SyncStatus::Error);
        assert!(entry.error.is_some());

        // Errored entries are skipped until an operator requeues.
        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::DuplicateAvoided { .. }));

        *remote.fail_next.borrow_mut() = false;
        store.requeue("k1").unwrap();
        let outcome = create_or_update(&store, "k1", &remote, temp.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::Created { .. }));
    }

    #[test]
    fn test_missing_source_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = SyncStore::new(temp.path().join("sync.json"));

        store
            .append(SyncEntry::new("k1", "Doc1", "missing.md", "Inbox"))
            .unwrap();

        let outcome = create_or_update(&store, "k1", &MockRemote::default(), temp.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(store.get("k1").unwrap().unwrap().status, SyncStatus::Error);
    }

    #[test]
    fn test_process_pending_handles_all_pending() {
        let temp = TempDir::new().unwrap();
        let store = fixture(&temp);
        fs::write(temp.path().join("doc2.md"), "# Doc2").unwrap();
        let remote = MockRemote::default();

        store
            .append(SyncEntry::new("k1", "Doc1", "doc1.md", "Inbox"))
            .unwrap();
        store
            .append(SyncEntry::new("k2", "Doc2", "doc2.md", "Inbox"))
            .unwrap();

        let outcomes = process_pending(&store, &remote, temp.path()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(*remote.creates.borrow(), 2);

        // Nothing pending on the second pass.
        assert!(process_pending(&store, &remote, temp.path())
            .unwrap()
            .is_empty());
    }
}
