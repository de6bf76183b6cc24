use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a timeline entry.
///
/// `Pending` ids exist only on this client; an entry keeps its pending id
/// until the server assigns an id for the same logical message, at which
/// point the entry is superseded in place with a `Confirmed` id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntryId {
    Pending(Uuid),
    Confirmed(i64),
}

impl EntryId {
    pub fn fresh() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    pub fn confirmed(self) -> Option<i64> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One rendered message in the conversation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: EntryId,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub error: bool,
    pub timestamp: DateTime<Utc>,
}

/// External account integration whose data is imported via a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Hubspot,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Gmail, Provider::Hubspot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Hubspot => "hubspot",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope of a provider sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Recent,
    Full,
}

impl SyncMode {
    /// Value carried in the `mode` query parameter of a sync-start request.
    pub fn wire_value(&self) -> &'static str {
        match self {
            Self::Recent => "month",
            Self::Full => "all",
        }
    }
}
