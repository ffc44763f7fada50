use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row-level change delivered on a Change Feed channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "UPPERCASE")]
pub enum RowChange<T> {
    Insert { row: T },
    Update { row: T },
    Delete { id: Uuid },
}

impl<T> RowChange<T> {
    pub fn label(&self) -> &'static str {
        match self {
            RowChange::Insert { .. } => "insert",
            RowChange::Update { .. } => "update",
            RowChange::Delete { .. } => "delete",
        }
    }
}

/// Pub/sub channel names, all derived from one configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub announcements: String,
    pub timers: String,
    pub display: String,
}

impl Channels {
    pub fn new(prefix: &str) -> Self {
        Self {
            announcements: format!("{prefix}:changes:announcements"),
            timers: format!("{prefix}:changes:timers"),
            display: format!("{prefix}:display"),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.announcements, &self.timers, &self.display]
    }
}
