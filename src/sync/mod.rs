pub mod conversation;
pub mod notifications;
pub mod store;

pub use conversation::{ConversationSync, SyncPhase};
pub use notifications::NotificationAggregator;
pub use store::ConversationStore;
