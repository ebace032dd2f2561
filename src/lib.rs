//! Realtime communication core for the RoadAid marketplace.
//!
//! One long-lived, multiplexed WebSocket connection delivers chat messages and
//! operational notifications to many independent UI surfaces, while older
//! conversation history arrives through a cursor-paginated REST feed. The
//! pieces, leaves first: the transport connection (lifecycle, heartbeat,
//! reconnect), the channel multiplexer (frames to typed events), the
//! subscriber registry (fault-isolated fan-out), per-conversation
//! synchronizers (ordered, deduplicated timelines with optimistic sends) and
//! the notification aggregator.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod multiplexer;
pub mod registry;
pub mod services;
pub mod sync;
pub mod transport;

pub use client::RealtimeClient;
pub use config::Config;
pub use error::{RealtimeError, RealtimeResult};
pub use models::{ChatMessage, DomainEvent, LocalIdentity, Notification, SenderType};
pub use transport::{ConnectionState, TransportConnection};
