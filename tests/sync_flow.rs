//! Conversation synchronization against an in-memory history feed: cursor
//! paging, push/fetch races, chat-notification routing and fetch failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use roadaid_realtime::error::{RealtimeError, RealtimeResult};
use roadaid_realtime::models::{
    ChatMessage, Conversation, DomainEvent, LocalIdentity, Notification, NotificationKind,
    SenderType,
};
use roadaid_realtime::services::{MessageHistory, MessagePage};
use roadaid_realtime::sync::{ConversationStore, ConversationSync, NotificationAggregator, SyncPhase};
use roadaid_realtime::transport::OutboundPublisher;

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-08-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn message(conversation: Uuid, n: i64) -> ChatMessage {
    ChatMessage {
        id: Some(format!("m-{n}")),
        conversation_id: conversation,
        sender_id: Uuid::new_v4(),
        sender_type: SenderType::RescueCompany,
        content: format!("message {n}"),
        sent_at: base_time() + chrono::Duration::seconds(n),
        is_read: false,
    }
}

struct NullPublisher;

impl OutboundPublisher for NullPublisher {
    fn publish(&self, _destination: &str, _payload: &serde_json::Value) {}
}

/// History feed scripted per cursor, with failure injection and a gate to
/// hold fetches open.
struct ScriptedHistory {
    pages: Mutex<HashMap<Option<String>, MessagePage>>,
    fetches: Mutex<Vec<(Uuid, Option<String>, bool)>>,
    fail: AtomicBool,
    gate: tokio::sync::Mutex<()>,
}

impl ScriptedHistory {
    fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    fn script(&self, cursor: Option<&str>, page: MessagePage) {
        self.pages
            .lock()
            .unwrap()
            .insert(cursor.map(str::to_string), page);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHistory for ScriptedHistory {
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        cursor: Option<&str>,
        _limit: u32,
        mark_as_read: bool,
    ) -> RealtimeResult<MessagePage> {
        let _held = self.gate.lock().await;
        self.fetches
            .lock()
            .unwrap()
            .push((conversation_id, cursor.map(str::to_string), mark_as_read));
        if self.fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::Api { status: 500 });
        }
        self.pages
            .lock()
            .unwrap()
            .get(&cursor.map(str::to_string))
            .cloned()
            .ok_or(RealtimeError::Api { status: 404 })
    }

    async fn list_conversations(&self, _page: u32, _limit: u32) -> RealtimeResult<Vec<Conversation>> {
        Ok(vec![])
    }

    async fn get_conversation(&self, _id: Uuid) -> RealtimeResult<Conversation> {
        Err(RealtimeError::Api { status: 404 })
    }
}

fn sync_over(history: Arc<ScriptedHistory>, conversation: Uuid) -> ConversationSync {
    ConversationSync::new(
        conversation,
        LocalIdentity {
            user_id: Uuid::new_v4(),
            sender_type: SenderType::User,
        },
        history,
        Arc::new(NullPublisher),
        20,
    )
}

#[tokio::test]
async fn paging_prepends_older_messages_without_duplicates() -> anyhow::Result<()> {
    let conversation = Uuid::new_v4();
    let history = Arc::new(ScriptedHistory::new());
    // Newest page first; the older page sits behind cursor c1.
    history.script(
        None,
        MessagePage {
            messages: (21..=40).map(|n| message(conversation, n)).collect(),
            next_cursor: Some("c1".into()),
        },
    );
    history.script(
        Some("c1"),
        MessagePage {
            messages: (1..=20).map(|n| message(conversation, n)).collect(),
            next_cursor: None,
        },
    );

    let sync = sync_over(history.clone(), conversation);
    sync.load_initial().await?;
    assert_eq!(sync.messages().len(), 20);
    assert_eq!(sync.next_cursor().as_deref(), Some("c1"));

    sync.load_more().await?;
    let timeline = sync.messages();
    assert_eq!(timeline.len(), 40);
    assert_eq!(sync.next_cursor(), None);

    // Ascending and free of duplicate ids across the two pages.
    let times: Vec<_> = timeline.iter().map(|m| m.sent_at).collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times, sorted);
    let unique: std::collections::HashSet<_> = timeline.iter().map(|m| m.id.clone()).collect();
    assert_eq!(unique.len(), 40);

    // The cursor travelled to the server on the second fetch only.
    let fetches = history.fetches.lock().unwrap().clone();
    assert_eq!(fetches[0].1, None);
    assert_eq!(fetches[1].1.as_deref(), Some("c1"));

    // With no more history, load_more is a no-op.
    sync.load_more().await?;
    assert_eq!(history.fetch_count(), 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_load_more_is_a_single_fetch() -> anyhow::Result<()> {
    let conversation = Uuid::new_v4();
    let history = Arc::new(ScriptedHistory::new());
    history.script(
        None,
        MessagePage {
            messages: vec![message(conversation, 10)],
            next_cursor: Some("c1".into()),
        },
    );
    history.script(
        Some("c1"),
        MessagePage {
            messages: vec![message(conversation, 1)],
            next_cursor: None,
        },
    );

    let sync = Arc::new(sync_over(history.clone(), conversation));
    sync.load_initial().await?;

    // Hold the feed open so the first load_more stays in flight.
    let held = history.gate.lock().await;
    let first = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.load_more().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second call sees the in-flight load and returns without fetching.
    sync.load_more().await?;
    drop(held);
    first.await??;

    assert_eq!(history.fetch_count(), 2); // initial + one load_more
    assert_eq!(sync.messages().len(), 2);
    Ok(())
}

#[tokio::test]
async fn chat_notification_refreshes_conversation_not_the_feed() -> anyhow::Result<()> {
    let conversation = Uuid::new_v4();
    let history = Arc::new(ScriptedHistory::new());
    history.script(
        None,
        MessagePage {
            messages: vec![message(conversation, 1)],
            next_cursor: None,
        },
    );

    let store = Arc::new(ConversationStore::new(
        LocalIdentity {
            user_id: Uuid::new_v4(),
            sender_type: SenderType::User,
        },
        history.clone() as Arc<dyn MessageHistory>,
        Arc::new(NullPublisher),
        20,
    ));
    let aggregator = NotificationAggregator::new();

    let mut additional_data = serde_json::Map::new();
    additional_data.insert(
        "conversationId".into(),
        serde_json::Value::String(conversation.to_string()),
    );
    let event = DomainEvent::Notification(Notification {
        recipient_id: Uuid::new_v4(),
        title: "New message".into(),
        content: "…".into(),
        kind: NotificationKind::Chat,
        sent_at: Utc::now(),
        additional_data,
    });

    store.handle_event(&event);
    aggregator.on_event(&event);

    // The spawned refresh lands in the conversation's synchronizer.
    let sync = store.sync_for(conversation);
    for _ in 0..50 {
        if sync.phase() == SyncPhase::Ready {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sync.phase(), SyncPhase::Ready);
    assert_eq!(sync.messages().len(), 1);
    assert_eq!(history.fetch_count(), 1);

    // The aggregator's counter never moved.
    assert_eq!(aggregator.unread_count(), 0);
    assert!(aggregator.feed().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_fetch_leaves_timeline_intact() -> anyhow::Result<()> {
    let conversation = Uuid::new_v4();
    let history = Arc::new(ScriptedHistory::new());
    history.script(
        None,
        MessagePage {
            messages: vec![message(conversation, 5), message(conversation, 6)],
            next_cursor: Some("c1".into()),
        },
    );

    let sync = sync_over(history.clone(), conversation);
    sync.load_initial().await?;
    assert_eq!(sync.messages().len(), 2);

    history.fail.store(true, Ordering::SeqCst);
    let err = sync.load_more().await.unwrap_err();
    assert!(matches!(err, RealtimeError::Api { status: 500 }));
    assert_eq!(sync.messages().len(), 2);
    assert_eq!(sync.phase(), SyncPhase::Ready);

    // The failure is transient: the next explicit load succeeds.
    history.fail.store(false, Ordering::SeqCst);
    history.script(
        Some("c1"),
        MessagePage {
            messages: vec![message(conversation, 1)],
            next_cursor: None,
        },
    );
    sync.load_more().await?;
    assert_eq!(sync.messages().len(), 3);
    Ok(())
}

#[tokio::test]
async fn active_conversation_switch_changes_unread_attribution() -> anyhow::Result<()> {
    let viewed = Uuid::new_v4();
    let background = Uuid::new_v4();
    let history = Arc::new(ScriptedHistory::new());
    let me = Uuid::new_v4();

    let store = Arc::new(ConversationStore::new(
        LocalIdentity {
            user_id: me,
            sender_type: SenderType::User,
        },
        history as Arc<dyn MessageHistory>,
        Arc::new(NullPublisher),
        20,
    ));
    store.set_active(Some(viewed));

    store.handle_event(&DomainEvent::Chat(message(viewed, 1)));
    store.handle_event(&DomainEvent::Chat(message(background, 2)));
    assert_eq!(store.sync_for(viewed).unread_count(), 0);
    assert_eq!(store.sync_for(background).unread_count(), 1);

    // Switching resets the newly-viewed conversation and re-attributes pushes.
    store.set_active(Some(background));
    assert_eq!(store.sync_for(background).unread_count(), 0);
    store.handle_event(&DomainEvent::Chat(message(viewed, 3)));
    assert_eq!(store.sync_for(viewed).unread_count(), 1);
    Ok(())
}
