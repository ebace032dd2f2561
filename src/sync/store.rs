//! Conversation-keyed registry of synchronizers.
//!
//! Synchronizers are created on first contact with a conversation and survive
//! navigation: switching the actively-viewed conversation only changes unread
//! attribution, and an in-flight page fetch for a conversation no longer in
//! view still lands in that conversation's own synchronizer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::models::{DomainEvent, LocalIdentity, NotificationKind};
use crate::services::MessageHistory;
use crate::sync::conversation::ConversationSync;
use crate::transport::OutboundPublisher;

pub struct ConversationStore {
    identity: LocalIdentity,
    history: Arc<dyn MessageHistory>,
    publisher: Arc<dyn OutboundPublisher>,
    page_size: u32,
    synchronizers: Mutex<HashMap<Uuid, Arc<ConversationSync>>>,
    active: Mutex<Option<Uuid>>,
}

impl ConversationStore {
    pub fn new(
        identity: LocalIdentity,
        history: Arc<dyn MessageHistory>,
        publisher: Arc<dyn OutboundPublisher>,
        page_size: u32,
    ) -> Self {
        Self {
            identity,
            history,
            publisher,
            page_size,
            synchronizers: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    /// Synchronizer for `conversation_id`, created on first use.
    pub fn sync_for(&self, conversation_id: Uuid) -> Arc<ConversationSync> {
        let mut guard = self
            .synchronizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guard.entry(conversation_id).or_insert_with(|| {
            Arc::new(ConversationSync::new(
                conversation_id,
                self.identity,
                Arc::clone(&self.history),
                Arc::clone(&self.publisher),
                self.page_size,
            ))
        }))
    }

    /// Mark which conversation the user is looking at; its pushes stop
    /// counting as unread and its counter resets.
    pub fn set_active(&self, conversation_id: Option<Uuid>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = conversation_id;
        if let Some(id) = conversation_id {
            self.sync_for(id).mark_read();
        }
    }

    pub fn active(&self) -> Option<Uuid> {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registry callback: route chat pushes to the owning synchronizer and
    /// chat-typed notifications to a background refresh of that conversation.
    pub fn handle_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::Chat(message) => {
                let sync = self.sync_for(message.conversation_id);
                let active = self.active() == Some(message.conversation_id);
                sync.apply_push(message, active);
            }
            DomainEvent::Notification(n) if n.kind == NotificationKind::Chat => {
                let Some(conversation_id) = n.conversation_id() else {
                    tracing::warn!("chat notification without conversationId, dropping");
                    return;
                };
                let sync = self.sync_for(conversation_id);
                let mark_as_read = self.active() == Some(conversation_id);
                tokio::spawn(async move {
                    if let Err(e) = sync.refresh(mark_as_read).await {
                        tracing::warn!(
                            %conversation_id,
                            error = %e,
                            "refresh after chat notification failed"
                        );
                    }
                });
            }
            DomainEvent::Notification(_) => {}
        }
    }
}
