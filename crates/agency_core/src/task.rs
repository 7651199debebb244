use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Identifier of a task row as reported by the backend. Feeds are free to use
/// numeric or string ids; within one snapshot an id is unique either way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum TaskKey {
    Number(i64),
    Text(String),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKey::Number(value) => write!(f, "{value}"),
            TaskKey::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for TaskKey {
    fn from(value: i64) -> Self {
        TaskKey::Number(value)
    }
}

impl From<&str> for TaskKey {
    fn from(value: &str) -> Self {
        TaskKey::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEntry {
    pub id: TaskKey,
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Fields the console does not interpret are carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskEntry {
    pub fn new(id: impl Into<TaskKey>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

/// Remembers the previously observed task list for one actor and reports
/// which entries are new relative to it. A task is new iff its id was absent
/// from the prior snapshot; field changes on a known id never count.
#[derive(Debug, Default)]
pub struct SnapshotDiffer {
    previous: Option<Vec<TaskEntry>>,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_snapshot(&self) -> bool {
        self.previous.is_some()
    }

    /// Last observed task list, in fetch order.
    pub fn snapshot(&self) -> Option<&[TaskEntry]> {
        self.previous.as_deref()
    }

    /// Diffs `entries` against the stored snapshot and then replaces it
    /// wholesale, whether or not anything was new. The first observation
    /// seeds the snapshot and reports nothing.
    pub fn observe(&mut self, entries: &[TaskEntry]) -> Vec<TaskEntry> {
        let fresh = match &self.previous {
            Some(previous) => {
                let seen: HashSet<&TaskKey> = previous.iter().map(|entry| &entry.id).collect();
                entries
                    .iter()
                    .filter(|entry| !seen.contains(&entry.id))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };
        self.previous = Some(entries.to_vec());
        fresh
    }

    /// Forgets the stored snapshot, e.g. when the actor changes.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}
