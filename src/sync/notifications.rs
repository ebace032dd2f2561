//! Prepend-growing notification feed with an unread counter.
//!
//! The feed is display-only history; read state is a single counter, and
//! `mark_all_read` resets it without touching per-item flags. Chat-typed
//! notifications belong to conversation synchronizers and are not counted
//! here.

use std::sync::{Mutex, PoisonError};

use crate::models::{DomainEvent, Notification, NotificationKind};

#[derive(Default)]
struct Feed {
    items: Vec<Notification>,
    unread: u32,
}

#[derive(Default)]
pub struct NotificationAggregator {
    inner: Mutex<Feed>,
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry callback. ChatMessage events and chat-typed notifications are
    /// ignored; everything else is prepended (newest first).
    pub fn on_event(&self, event: &DomainEvent) {
        let DomainEvent::Notification(notification) = event else {
            return;
        };
        if notification.kind == NotificationKind::Chat {
            return;
        }
        let mut feed = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        feed.items.insert(0, notification.clone());
        feed.unread += 1;
    }

    /// Reset the unread counter. Idempotent; the feed itself is untouched.
    pub fn mark_all_read(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unread = 0;
    }

    pub fn unread_count(&self) -> u32 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unread
    }

    /// Newest-first snapshot of the feed.
    pub fn feed(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn notification(title: &str, kind: NotificationKind) -> DomainEvent {
        DomainEvent::Notification(Notification {
            recipient_id: Uuid::nil(),
            title: title.to_string(),
            content: String::new(),
            kind,
            sent_at: Utc::now(),
            additional_data: Default::default(),
        })
    }

    #[test]
    fn test_feed_grows_newest_first() {
        let aggregator = NotificationAggregator::new();
        aggregator.on_event(&notification("first", NotificationKind::PriceUpdate));
        aggregator.on_event(&notification("second", NotificationKind::Dispatch));

        let feed = aggregator.feed();
        assert_eq!(feed[0].title, "second");
        assert_eq!(feed[1].title, "first");
        assert_eq!(aggregator.unread_count(), 2);
    }

    #[test]
    fn test_mark_all_read_is_idempotent_and_keeps_feed() {
        let aggregator = NotificationAggregator::new();
        aggregator.on_event(&notification("invoice", NotificationKind::Invoice));
        aggregator.mark_all_read();
        aggregator.mark_all_read();
        assert_eq!(aggregator.unread_count(), 0);
        assert_eq!(aggregator.feed().len(), 1);
    }

    #[test]
    fn test_chat_events_do_not_touch_the_counter() {
        let aggregator = NotificationAggregator::new();
        aggregator.on_event(&notification("chat ping", NotificationKind::Chat));

        let chat = DomainEvent::Chat(
            serde_json::from_value(json!({
                "id": "m-1",
                "conversationId": "5f0c9ee5-4f8e-4f22-9d42-000000000001",
                "senderId": "5f0c9ee5-4f8e-4f22-9d42-000000000002",
                "senderType": "USER",
                "content": "hi",
                "sentAt": "2026-08-01T12:00:00Z"
            }))
            .unwrap(),
        );
        aggregator.on_event(&chat);

        assert_eq!(aggregator.unread_count(), 0);
        assert!(aggregator.feed().is_empty());
    }
}
