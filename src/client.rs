//! Facade tying the core together for UI consumers.
//!
//! One `RealtimeClient` exists per authenticated session regardless of UI
//! mount/unmount churn; its lifecycle follows authentication, not navigation.
//! UI layers get read-only views (state watchers, synchronizer handles) and
//! never touch the socket.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::watch;

use crate::config::Config;
use crate::models::LocalIdentity;
use crate::multiplexer::ChannelMultiplexer;
use crate::registry::{SubscriberHandle, SubscriberRegistry};
use crate::services::{HttpMessageHistory, MessageHistory, SessionToken};
use crate::sync::{ConversationStore, NotificationAggregator};
use crate::transport::{ConnectionState, TransportConnection};

pub struct RealtimeClient {
    config: Arc<Config>,
    transport: Arc<TransportConnection>,
    registry: SubscriberRegistry,
    store: Arc<ConversationStore>,
    notifications: Arc<NotificationAggregator>,
    history: Arc<dyn MessageHistory>,
    token: SessionToken,
    // keeps the store/aggregator wiring registered for the client's lifetime
    _wiring: Vec<SubscriberHandle>,
}

impl RealtimeClient {
    pub fn new(config: Config, identity: LocalIdentity) -> Self {
        let config = Arc::new(config);
        let token = SessionToken::default();
        let history: Arc<dyn MessageHistory> =
            Arc::new(HttpMessageHistory::new(&config.api_url, token.clone()));

        let transport = TransportConnection::new(Arc::clone(&config));
        let registry = SubscriberRegistry::new();
        ChannelMultiplexer::attach(&transport, &registry, identity.user_id);

        let store = Arc::new(ConversationStore::new(
            identity,
            Arc::clone(&history),
            transport.clone(),
            config.page_size,
        ));
        let notifications = Arc::new(NotificationAggregator::new());

        let mut wiring = Vec::new();
        {
            let store = Arc::clone(&store);
            wiring.push(registry.subscribe(move |event| store.handle_event(event)));
        }
        {
            let notifications = Arc::clone(&notifications);
            wiring.push(registry.subscribe(move |event| notifications.on_event(event)));
        }

        Self {
            config,
            transport,
            registry,
            store,
            notifications,
            history,
            token,
            _wiring: wiring,
        }
    }

    /// Open the shared connection; called once at login. Idempotent.
    pub fn connect(&self, token: Option<&str>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.token.set(token);
        }
        self.transport.connect(token);
    }

    /// Tear the connection down; called at logout. Idempotent.
    pub fn disconnect(&self) {
        self.transport.disconnect();
        self.token.clear();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn notifications(&self) -> &Arc<NotificationAggregator> {
        &self.notifications
    }

    pub fn history(&self) -> &Arc<dyn MessageHistory> {
        &self.history
    }
}

static GLOBAL: OnceCell<RealtimeClient> = OnceCell::new();

/// Install the process-wide client. Fails when one is already installed.
pub fn init_global(client: RealtimeClient) -> Result<(), RealtimeClient> {
    GLOBAL.set(client)
}

/// The process-wide client, if one was installed.
pub fn global() -> Option<&'static RealtimeClient> {
    GLOBAL.get()
}
