use chrono::{DateTime, Utc};

use super::message::ChatMessage;
use super::notification::Notification;
use crate::error::RealtimeResult;

/// Decoded inbound event. One wire channel carries two message kinds; the
/// multiplexer discriminates structurally at the boundary so everything
/// downstream consumes this sum type rather than raw JSON.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    Chat(ChatMessage),
    Notification(Notification),
}

impl DomainEvent {
    /// Server-clock timestamp used for ordering.
    pub fn sent_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::Chat(m) => m.sent_at,
            DomainEvent::Notification(n) => n.sent_at,
        }
    }

    /// Decode a frame body. Notifications are recognized by the presence of
    /// `title` and `type`; anything else must be chat-shaped.
    pub fn decode(body: &str) -> RealtimeResult<Self> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        if value.get("title").is_some() && value.get("type").is_some() {
            Ok(DomainEvent::Notification(serde_json::from_value(value)?))
        } else {
            Ok(DomainEvent::Chat(serde_json::from_value(value)?))
        }
    }
}
