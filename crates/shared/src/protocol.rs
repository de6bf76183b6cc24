use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChatRole, Provider};

/// One prior turn included in the conversation snapshot sent alongside a
/// chat request. Only server-confirmed messages are ever snapshotted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-assigned id of the stored assistant message, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub error: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<HistoryMessage>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderSyncStatus {
    #[serde(default)]
    pub syncing: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    #[serde(default)]
    pub gmail: ProviderSyncStatus,
    #[serde(default)]
    pub hubspot: ProviderSyncStatus,
}

impl SyncStatusResponse {
    pub fn provider(&self, provider: Provider) -> ProviderSyncStatus {
        match provider {
            Provider::Gmail => self.gmail,
            Provider::Hubspot => self.hubspot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hubspot_name: Option<String>,
    #[serde(default)]
    pub has_google: bool,
    #[serde(default)]
    pub has_hubspot: bool,
}

impl UserProfile {
    /// Whether the user has already linked the given provider account.
    pub fn is_linked(&self, provider: Provider) -> bool {
        match provider {
            Provider::Gmail => self.has_google,
            Provider::Hubspot => self.has_hubspot,
        }
    }
}
