use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of mutation carried by a change-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Read,
    Bookmarked,
    Archived,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Read => "read",
            ChangeKind::Bookmarked => "bookmarked",
            ChangeKind::Archived => "archived",
            ChangeKind::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(ChangeKind::Read),
            "bookmarked" => Some(ChangeKind::Bookmarked),
            "archived" => Some(ChangeKind::Archived),
            "deleted" => Some(ChangeKind::Deleted),
            _ => None,
        }
    }
}

/// One mutation to one article, identified by its stable uuid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleChange {
    pub uuid: Uuid,
    pub kind: ChangeKind,
    pub value: bool,
    pub changed_at: DateTime<Utc>,
}

/// Bundle of mutations exchanged with the replication service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<ArticleChange>,
}

impl ChangeSet {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
