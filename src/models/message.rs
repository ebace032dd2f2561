use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of locally-synthesized message ids used by the optimistic send path.
/// Entries carrying such an id are pending until a confirmed push reconciles them.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    User,
    RescueCompany,
    Admin,
}

/// A single chat message as it travels on the wire and in merged timelines.
///
/// `id` is server-assigned; optimistic local sends carry a `temp-{millis}` id
/// until the confirming push arrives. Wire format is the platform's camelCase
/// JSON convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: SenderType,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// Content-derived identity used to recognize that two message records
/// represent the same logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Server-assigned id, authoritative when present
    Id(String),
    /// Fallback for unconfirmed entries
    Content {
        conversation_id: Uuid,
        sender_id: Uuid,
        content: String,
        sent_at_millis: i64,
    },
}

impl ChatMessage {
    /// Whether this entry still awaits server confirmation.
    pub fn is_pending(&self) -> bool {
        match &self.id {
            None => true,
            Some(id) => id.starts_with(TEMP_ID_PREFIX),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        match &self.id {
            Some(id) if !id.starts_with(TEMP_ID_PREFIX) => DedupKey::Id(id.clone()),
            _ => DedupKey::Content {
                conversation_id: self.conversation_id,
                sender_id: self.sender_id,
                content: self.content.clone(),
                sent_at_millis: self.sent_at.timestamp_millis(),
            },
        }
    }

    /// Whether `pending` is the local optimistic entry this confirmed message
    /// settles. Timestamps differ between the local and the server clock, so
    /// the match is on conversation, sender and content only.
    pub fn settles(&self, pending: &ChatMessage) -> bool {
        !self.is_pending()
            && pending.is_pending()
            && self.conversation_id == pending.conversation_id
            && self.sender_id == pending.sender_id
            && self.content == pending.content
    }
}
