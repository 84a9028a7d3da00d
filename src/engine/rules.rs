use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::diff::StoreEvent;

/// Which store document a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedStore {
    Queue,
    Sync,
}

impl WatchedStore {
    pub fn name(&self) -> &'static str {
        match self {
            WatchedStore::Queue => "queue",
            WatchedStore::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    EntryAdded,
    StatusChanged,
    EntryRemoved,
}

/// What a matched rule does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Run the document sync for the affected entry (or all pending entries
    /// when the event came from another store).
    Sync,
    /// Spawn a subprocess; the event is passed as a JSON argument.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub watch: WatchedStore,
    pub trigger: TriggerKind,
    /// If set, the entry's status after the change must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_status: Option<String>,
    pub action: ActionSpec,
}

impl Rule {
    pub fn matches(&self, store: WatchedStore, event: &StoreEvent) -> bool {
        if self.watch != store {
            return false;
        }
        let trigger_matches = matches!(
            (self.trigger, event),
            (TriggerKind::EntryAdded, StoreEvent::EntryAdded { .. })
                | (TriggerKind::StatusChanged, StoreEvent::StatusChanged { .. })
                | (TriggerKind::EntryRemoved, StoreEvent::EntryRemoved { .. })
        );
        if !trigger_matches {
            return false;
        }
        match &self.when_status {
            None => true,
            Some(wanted) => event.current_status() == Some(wanted.as_str()),
        }
    }
}

/// Named rules loaded from `rules.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: BTreeMap<String, Rule>,
}

impl Default for RuleSet {
    /// Built-in rules: sync new entries as they land, re-sync entries flagged
    /// for update, and retry entries an operator requeued.
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "sync-new-entries".to_string(),
            Rule {
                watch: WatchedStore::Sync,
                trigger: TriggerKind::EntryAdded,
                when_status: None,
                action: ActionSpec::Sync,
            },
        );
        rules.insert(
            "sync-flagged-updates".to_string(),
            Rule {
                watch: WatchedStore::Sync,
                trigger: TriggerKind::StatusChanged,
                when_status: Some("update".to_string()),
                action: ActionSpec::Sync,
            },
        );
        rules.insert(
            "sync-requeued".to_string(),
            Rule {
                watch: WatchedStore::Sync,
                trigger: TriggerKind::StatusChanged,
                when_status: Some("queued".to_string()),
                action: ActionSpec::Sync,
            },
        );
        Self { rules }
    }
}

impl RuleSet {
    /// Load from disk, falling back to the built-in rules when no file
    /// exists.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rules file {}", path.display()))
    }

    pub fn matching(&self, store: WatchedStore, event: &StoreEvent) -> Vec<(&str, &Rule)> {
        self.rules
            .iter()
            .filter(|(_, rule)| rule.matches(store, event))
            .map(|(name, rule)| (name.as_str(), rule))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_rules_match_sync_events() {
        let rules = RuleSet::default();

        let added = StoreEvent::EntryAdded {
            key: "k1".to_string(),
            status: "queued".to_string(),
        };
        assert_eq!(rules.matching(WatchedStore::Sync, &added).len(), 1);
        assert!(rules.matching(WatchedStore::Queue, &added).is_empty());

        let flagged = StoreEvent::StatusChanged {
            key: "k1".to_string(),
            from: "processed".to_string(),
            to: "update".to_string(),
        };
        let matched = rules.matching(WatchedStore::Sync, &flagged);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, "sync-flagged-updates");
    }

    #[test]
    fn test_when_status_filters_transitions() {
        let rule = Rule {
            watch: WatchedStore::Queue,
            trigger: TriggerKind::StatusChanged,
            when_status: Some("error".to_string()),
            action: ActionSpec::Sync,
        };

        let to_error = StoreEvent::StatusChanged {
            key: "a".to_string(),
            from: "in_progress".to_string(),
            to: "error".to_string(),
        };
        let to_done = StoreEvent::StatusChanged {
            key: "a".to_string(),
            from: "in_progress".to_string(),
            to: "done".to_string(),
        };

        assert!(rule.matches(WatchedStore::Queue, &to_error));
        assert!(!rule.matches(WatchedStore::Queue, &to_done));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let rules = RuleSet::load(&temp.path().join("rules.json")).unwrap();
        assert_eq!(rules, RuleSet::default());
    }

    #[test]
    fn test_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rules.json");

        let mut rules = RuleSet::default();
        rules.rules.insert(
            "notify-on-error".to_string(),
            Rule {
                watch: WatchedStore::Queue,
                trigger: TriggerKind::StatusChanged,
                when_status: Some("error".to_string()),
                action: ActionSpec::Command {
                    program: "notify-send".to_string(),
                    args: vec!["queue failure".to_string()],
                },
            },
        );
        fs::write(&path, serde_json::to_string_pretty(&rules).unwrap()).unwrap();

        assert_eq!(RuleSet::load(&path).unwrap(), rules);
    }
}
