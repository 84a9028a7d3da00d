use serde_json::Value;
use std::collections::BTreeMap;

/// Raw view of a store document: key -> record, untyped so the engine can
/// watch any of the JSON stores without knowing their schemas.
pub type Snapshot = BTreeMap<String, Value>;

/// Semantic change between two snapshots of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    EntryAdded { key: String, status: String },
    StatusChanged { key: String, from: String, to: String },
    EntryRemoved { key: String },
}

impl StoreEvent {
    pub fn key(&self) -> &str {
        match self {
            StoreEvent::EntryAdded { key, .. }
            | StoreEvent::StatusChanged { key, .. }
            | StoreEvent::EntryRemoved { key } => key,
        }
    }

    /// The entry's status after the change, where one exists.
    pub fn current_status(&self) -> Option<&str> {
        match self {
            StoreEvent::EntryAdded { status, .. } => Some(status),
            StoreEvent::StatusChanged { to, .. } => Some(to),
            StoreEvent::EntryRemoved { .. } => None,
        }
    }
}

pub fn status_of(value: &Value) -> String {
    value
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Diff two snapshots into events.
///
/// Existence is checked before field values: a key absent from the old
/// snapshot is `EntryAdded` no matter what status it already reached, so an
/// entry that lands and hits its target status between two ticks still
/// produces exactly one event. Comparing only status values would miss it.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> Vec<StoreEvent> {
    let mut events = Vec::new();

    for (key, new_value) in new {
        match old.get(key) {
            None => events.push(StoreEvent::EntryAdded {
                key: key.clone(),
                status: status_of(new_value),
            }),
            Some(old_value) => {
                let from = status_of(old_value);
                let to = status_of(new_value);
                if from != to {
                    events.push(StoreEvent::StatusChanged {
                        key: key.clone(),
                        from,
                        to,
                    });
                }
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            events.push(StoreEvent::EntryRemoved { key: key.clone() });
        }
    }

    events
}
