//! Binds the fixed set of logical channels to the live connection and decodes
//! inbound frames into typed domain events.
//!
//! Subscriptions are declared from the transport's connect hook on every
//! successful (re)connect; the transport itself never remembers them across
//! sessions. A frame whose body fails to decode is logged and dropped without
//! touching the connection or later frames.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::DomainEvent;
use crate::registry::SubscriberRegistry;
use crate::transport::TransportConnection;

/// Logical subscription target on the pub/sub transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Private per-user queue
    Personal(Uuid),
    /// Shared broadcast topic
    Public,
}

impl Channel {
    pub fn destination(&self) -> String {
        match self {
            Channel::Personal(user_id) => format!("personal:{user_id}"),
            Channel::Public => "public".to_string(),
        }
    }
}

pub struct ChannelMultiplexer;

impl ChannelMultiplexer {
    /// Wire the transport to the registry for the given user. Call once per
    /// session, before `connect`.
    pub fn attach(
        transport: &Arc<TransportConnection>,
        registry: &SubscriberRegistry,
        user_id: Uuid,
    ) {
        let dispatch = registry.clone();
        transport.set_frame_handler(move |frame| match DomainEvent::decode(&frame.body) {
            Ok(event) => dispatch.publish(&event),
            Err(e) => {
                tracing::warn!(
                    destination = %frame.destination,
                    error = %e,
                    "dropping undecodable frame"
                );
            }
        });

        let weak = Arc::downgrade(transport);
        transport.on_connect(move || {
            if let Some(transport) = weak.upgrade() {
                transport.subscribe(&Channel::Personal(user_id).destination());
                transport.subscribe(&Channel::Public.destination());
            }
        });
    }
}
