//! Per-conversation timeline synchronization.
//!
//! Three sources feed one timeline: backward cursor pages from REST, live
//! pushes from the subscriber registry, and locally-originated optimistic
//! sends. REST fetches race live pushes with no ordering guarantee between
//! them; the merge step here (ordered insert plus dedup) is what restores a
//! consistent view regardless of which arrives first.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::error::RealtimeResult;
use crate::models::{ChatMessage, LocalIdentity, TEMP_ID_PREFIX};
use crate::services::MessageHistory;
use crate::transport::{OutboundPublisher, SEND_DESTINATION};

/// Loading phase of a conversation. `Loading` is only entered for explicit
/// fetches, never for live pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Empty,
    Loading,
    Ready,
}

/// Pure timeline state; every mutation upholds the two invariants:
/// no two entries share a dedup key, and `sent_at` is non-decreasing
/// with ties kept in insertion order.
#[derive(Debug)]
struct TimelineState {
    phase: SyncPhase,
    messages: Vec<ChatMessage>,
    next_cursor: Option<String>,
    load_in_flight: bool,
    unread_count: u32,
}

impl TimelineState {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Empty,
            messages: Vec::new(),
            next_cursor: None,
            load_in_flight: false,
            unread_count: 0,
        }
    }

    /// Insert keeping `sent_at` non-decreasing; equal timestamps preserve
    /// insertion order (scan from the tail, most pushes append).
    fn insert_ordered(&mut self, message: ChatMessage) {
        let index = self
            .messages
            .iter()
            .rposition(|m| m.sent_at <= message.sent_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages.insert(index, message);
    }

    /// Merge a live push. Returns true when the timeline gained a new entry
    /// (as opposed to a duplicate or a reconciled pending entry).
    fn merge_push(&mut self, message: &ChatMessage) -> bool {
        let key = message.dedup_key();
        if self.messages.iter().any(|m| m.dedup_key() == key) {
            return false;
        }

        // A confirmed push may be the echo of an optimistic local send whose
        // temp entry carries the local clock. Reconcile that entry in place
        // rather than inserting a second copy.
        if let Some(position) = self.messages.iter().position(|m| message.settles(m)) {
            let mut entry = self.messages.remove(position);
            entry.id = message.id.clone();
            entry.sent_at = message.sent_at;
            entry.is_read = message.is_read;
            self.insert_ordered(entry);
            return false;
        }

        self.insert_ordered(message.clone());
        true
    }

    /// Replace the timeline wholesale with a freshly fetched newest page.
    fn replace_with_page(&mut self, mut messages: Vec<ChatMessage>, next_cursor: Option<String>) {
        messages.sort_by_key(|m| m.sent_at);
        self.messages = messages;
        self.next_cursor = next_cursor;
        self.phase = SyncPhase::Ready;
    }

    /// Prepend an older page; entries already present (a push that raced the
    /// fetch) are skipped.
    fn prepend_page(&mut self, page: Vec<ChatMessage>, next_cursor: Option<String>) {
        let existing: HashSet<_> = self.messages.iter().map(|m| m.dedup_key()).collect();
        let mut merged: Vec<ChatMessage> = page
            .into_iter()
            .filter(|m| !existing.contains(&m.dedup_key()))
            .collect();
        merged.sort_by_key(|m| m.sent_at);
        merged.append(&mut self.messages);
        self.messages = merged;
        self.next_cursor = next_cursor;
        self.phase = SyncPhase::Ready;
    }
}

/// Synchronizer for one conversation. Cheap to share; all state lives behind
/// a short-lived lock that is never held across an await point.
pub struct ConversationSync {
    conversation_id: Uuid,
    identity: LocalIdentity,
    history: Arc<dyn MessageHistory>,
    publisher: Arc<dyn OutboundPublisher>,
    page_size: u32,
    state: Mutex<TimelineState>,
}

impl ConversationSync {
    pub fn new(
        conversation_id: Uuid,
        identity: LocalIdentity,
        history: Arc<dyn MessageHistory>,
        publisher: Arc<dyn OutboundPublisher>,
        page_size: u32,
    ) -> Self {
        Self {
            conversation_id,
            identity,
            history,
            publisher,
            page_size,
            state: Mutex::new(TimelineState::new()),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the most recent page and replace the timeline wholesale. Used on
    /// first mount and on conversation switch; marks the conversation read
    /// server-side.
    pub async fn load_initial(&self) -> RealtimeResult<()> {
        self.refresh(true).await
    }

    /// Same replacement semantics as `load_initial` with caller-controlled
    /// read-receipt behavior (background refreshes must not mark as read).
    pub async fn refresh(&self, mark_as_read: bool) -> RealtimeResult<()> {
        {
            let mut state = self.lock();
            if state.load_in_flight {
                return Ok(());
            }
            state.load_in_flight = true;
            state.phase = SyncPhase::Loading;
        }

        let result = self
            .history
            .fetch_messages(self.conversation_id, None, self.page_size, mark_as_read)
            .await;

        let mut state = self.lock();
        state.load_in_flight = false;
        match result {
            Ok(page) => {
                state.replace_with_page(page.messages, page.next_cursor);
                Ok(())
            }
            Err(e) => {
                // A failed fetch never corrupts what is already displayed.
                state.phase = if state.messages.is_empty() {
                    SyncPhase::Empty
                } else {
                    SyncPhase::Ready
                };
                Err(e)
            }
        }
    }

    /// Fetch the next older page and prepend it. No-op when there is no more
    /// history or a load is already in flight.
    pub async fn load_more(&self) -> RealtimeResult<()> {
        let cursor = {
            let mut state = self.lock();
            let Some(cursor) = state.next_cursor.clone() else {
                return Ok(());
            };
            if state.load_in_flight {
                return Ok(());
            }
            state.load_in_flight = true;
            state.phase = SyncPhase::Loading;
            cursor
        };

        let result = self
            .history
            .fetch_messages(self.conversation_id, Some(&cursor), self.page_size, false)
            .await;

        let mut state = self.lock();
        state.load_in_flight = false;
        match result {
            Ok(page) => {
                state.prepend_page(page.messages, page.next_cursor);
                Ok(())
            }
            Err(e) => {
                state.phase = SyncPhase::Ready;
                Err(e)
            }
        }
    }

    /// Merge a live push. Duplicates (server redelivery, repeated frames
    /// during reconnection, echo of an optimistic send) are no-ops. `active`
    /// is whether this conversation is the one currently viewed.
    pub fn apply_push(&self, message: &ChatMessage, active: bool) {
        if message.conversation_id != self.conversation_id {
            return;
        }
        let mut state = self.lock();
        let inserted = state.merge_push(message);
        if inserted && message.sender_id != self.identity.user_id && !active {
            state.unread_count += 1;
        }
    }

    /// Insert a locally-authored message immediately and publish it to the
    /// broker. No delivery receipt exists; the confirming push reconciles the
    /// temp entry, and an unconfirmed one simply remains.
    pub fn send_optimistic(&self, content: &str) -> ChatMessage {
        let now = Utc::now();
        let message = ChatMessage {
            id: Some(format!("{TEMP_ID_PREFIX}{}", now.timestamp_millis())),
            conversation_id: self.conversation_id,
            sender_id: self.identity.user_id,
            sender_type: self.identity.sender_type,
            content: content.to_string(),
            sent_at: now,
            is_read: true,
        };

        self.lock().insert_ordered(message.clone());

        match serde_json::to_value(&message) {
            Ok(payload) => self.publisher.publish(SEND_DESTINATION, &payload),
            Err(e) => tracing::error!(error = %e, "failed to serialize outgoing message"),
        }
        message
    }

    /// Reset the unread counter. Idempotent.
    pub fn mark_read(&self) {
        self.lock().unread_count = 0;
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    pub fn unread_count(&self) -> u32 {
        self.lock().unread_count
    }

    pub fn phase(&self) -> SyncPhase {
        self.lock().phase
    }

    pub fn next_cursor(&self) -> Option<String> {
        self.lock().next_cursor.clone()
    }
}
