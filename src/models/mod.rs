pub mod conversation;
pub mod event;
pub mod message;
pub mod notification;

pub use conversation::{Conversation, ConversationStatus, Participant};
pub use event::DomainEvent;
pub use message::{ChatMessage, DedupKey, SenderType, TEMP_ID_PREFIX};
pub use notification::{Notification, NotificationKind};

use uuid::Uuid;

/// Identity of the locally authenticated principal.
///
/// Used to attribute optimistic sends and to decide whether an inbound push
/// counts toward a conversation's unread total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: Uuid,
    pub sender_type: SenderType,
}
