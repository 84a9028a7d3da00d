//! Event-driven automation loop.
//!
//! Each tick reads the watched store documents, diffs them against the last
//! persisted snapshots, and runs the actions of every matching rule. The new
//! snapshots are persisted only after the actions ran, so a crash mid-tick
//! replays the same events on restart; actions must tolerate that, and the
//! built-in sync action does.

mod diff;
mod rules;

pub use diff::{diff_snapshots, status_of, Snapshot, StoreEvent};
pub use rules::{ActionSpec, Rule, RuleSet, TriggerKind, WatchedStore};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::fs::WorkDir;
use crate::store::{DocumentStore, SyncStore};
use crate::sync::{create_or_update, process_pending, RemoteLibrary};

/// One rule execution, for operator display and logs.
#[derive(Debug)]
pub struct FiredAction {
    pub rule: String,
    pub store: WatchedStore,
    pub key: String,
    pub outcome: String,
}

pub struct Engine<'a> {
    queue_raw: DocumentStore<Value>,
    sync_raw: DocumentStore<Value>,
    state: DocumentStore<Snapshot>,
    rules: RuleSet,
    sync_store: SyncStore,
    remote: &'a dyn RemoteLibrary,
    content_root: PathBuf,
    /// Events already acted on in this engine session, keyed
    /// `store:key:rule:status`. Suppresses refires when a replayed tick
    /// produces an event the session already handled.
    fired: HashSet<String>,
}

impl<'a> Engine<'a> {
    pub fn new(
        work_dir: &WorkDir,
        rules: RuleSet,
        remote: &'a dyn RemoteLibrary,
        content_root: PathBuf,
    ) -> Self {
        Self {
            queue_raw: DocumentStore::new(work_dir.queue_path()),
            sync_raw: DocumentStore::new(work_dir.sync_path()),
            state: DocumentStore::new(work_dir.engine_state_path()),
            rules,
            sync_store: SyncStore::new(work_dir.sync_path()),
            remote,
            content_root,
            fired: HashSet::new(),
        }
    }

    /// One poll cycle: diff every watched store, run matching rules, persist
    /// the new snapshots.
    pub fn tick(&mut self) -> Result<Vec<FiredAction>> {
        let mut snapshots = self
            .state
            .snapshot()
            .context("Failed to load engine state")?;

        let mut pending: Vec<(String, Rule, WatchedStore, StoreEvent)> = Vec::new();
        for watch in [WatchedStore::Queue, WatchedStore::Sync] {
            let current = self.raw_snapshot(watch)?;
            let old = snapshots.remove(watch.name()).unwrap_or_default();

            for event in diff_snapshots(&old, &current) {
                for (name, rule) in self.rules.matching(watch, &event) {
                    pending.push((name.to_string(), rule.clone(), watch, event.clone()));
                }
            }
            snapshots.insert(watch.name().to_string(), current);
        }

        let mut actions = Vec::new();
        for (rule_name, rule, watch, event) in pending {
            let dedup_key = format!(
                "{}:{}:{}:{}",
                watch.name(),
                event.key(),
                rule_name,
                event.current_status().unwrap_or("removed")
            );
            if !self.fired.insert(dedup_key) {
                continue;
            }

            info!(rule = %rule_name, store = watch.name(), key = event.key(), "rule fired");
            let outcome = match self.run_action(&rule.action, watch, &event) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(rule = %rule_name, error = %format!("{e:#}"), "rule action failed");
                    format!("failed: {e:#}")
                }
            };
            actions.push(FiredAction {
                rule: rule_name,
                store: watch,
                key: event.key().to_string(),
                outcome,
            });
        }

        self.state
            .mutate(|map| {
                *map = snapshots;
                Ok(())
            })
            .context("Failed to persist engine state")?;

        Ok(actions)
    }

    fn raw_snapshot(&self, watch: WatchedStore) -> Result<Snapshot> {
        let store = match watch {
            WatchedStore::Queue => &self.queue_raw,
            WatchedStore::Sync => &self.sync_raw,
        };
        store
            .snapshot()
            .with_context(|| format!("Failed to read {} store", watch.name()))
    }

    fn run_action(
        &self,
        action: &ActionSpec,
        watch: WatchedStore,
        event: &StoreEvent,
    ) -> Result<String> {
        match action {
            ActionSpec::Sync => match (watch, event) {
                // Removal leaves nothing to sync.
                (WatchedStore::Sync, StoreEvent::EntryRemoved { .. }) => {
                    Ok("nothing to sync".to_string())
                }
                (WatchedStore::Sync, _) => {
                    let outcome = create_or_update(
                        &self.sync_store,
                        event.key(),
                        self.remote,
                        &self.content_root,
                    )?;
                    Ok(format!("{outcome:?}"))
                }
                // Events from other stores trigger a full pending pass.
                _ => {
                    let outcomes =
                        process_pending(&self.sync_store, self.remote, &self.content_root)?;
                    Ok(format!("synced {} pending entries", outcomes.len()))
                }
            },
            ActionSpec::Command { program, args } => {
                let event_json = json!({
                    "store": watch.name(),
                    "key": event.key(),
                    "status": event.current_status(),
                });
                let output = std::process::Command::new(program)
                    .args(args)
                    .arg(event_json.to_string())
                    .output()
                    .with_context(|| format!("Failed to run command '{program}'"))?;
                if output.status.success() {
                    Ok(format!("command '{program}' succeeded"))
                } else {
                    anyhow::bail!(
                        "command '{program}' exited with {}: {}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )
                }
            }
        }
    }
}
