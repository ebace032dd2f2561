use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Business event kinds pushed over the public and personal channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// New chat activity; routed to the matching conversation, not the feed
    Chat,
    PriceUpdate,
    Dispatch,
    Invoice,
    /// Kinds introduced server-side after this client shipped
    #[serde(other)]
    Other,
}

/// An operational notification (price update, dispatch event, invoice event).
///
/// `additional_data` is an opaque bag keyed by business context; chat-typed
/// notifications carry the target `conversationId` there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub recipient_id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub additional_data: Map<String, JsonValue>,
}

impl Notification {
    /// Conversation referenced by this notification, if any.
    pub fn conversation_id(&self) -> Option<Uuid> {
        self.additional_data
            .get("conversationId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
