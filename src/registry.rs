//! Publish/subscribe fan-out point between the multiplexer and the UI hooks.
//!
//! Every registered listener observes every decoded event exactly once, in
//! arrival order, isolated from panics in other listeners. Dispatch iterates a
//! snapshot of the listener list, so subscribing or unsubscribing from inside a
//! callback never corrupts or skips the in-progress dispatch. Nothing is
//! buffered for late subscribers; catch-up is the REST fetch on mount.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::models::DomainEvent;

type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct Inner {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Inner>,
}

/// Removes exactly one registration. Registering the same closure twice yields
/// two independent handles; each must be unsubscribed on its own.
pub struct SubscriberHandle {
    id: u64,
    inner: Weak<Inner>,
}

impl SubscriberHandle {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|r| r.id != self.id);
        }
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&DomainEvent) + Send + Sync + 'static) -> SubscriberHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                listener: Arc::new(listener),
            });
        SubscriberHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Synchronously deliver `event` to every listener in registration order.
    pub fn publish(&self, event: &DomainEvent) {
        let snapshot: Vec<Registration> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for registration in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.listener)(event)));
            if outcome.is_err() {
                tracing::error!(subscriber = registration.id, "listener panicked during dispatch");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{Notification, NotificationKind};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn event(title: &str) -> DomainEvent {
        DomainEvent::Notification(Notification {
            recipient_id: Uuid::nil(),
            title: title.to_string(),
            content: String::new(),
            kind: NotificationKind::Dispatch,
            sent_at: Utc::now(),
            additional_data: Default::default(),
        })
    }

    #[test]
    fn test_listener_isolation_from_panics() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _first = registry.subscribe(|_| panic!("listener bug"));
        let seen2 = Arc::clone(&seen);
        let _second = registry.subscribe(move |e| {
            if let DomainEvent::Notification(n) = e {
                seen2.lock().unwrap().push(n.title.clone());
            }
        });

        registry.publish(&event("a"));
        registry.publish(&event("b"));
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_one_registration() {
        let registry = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = {
            let hits = Arc::clone(&hits);
            move |_: &DomainEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = registry.subscribe(listener.clone());
        let _second = registry.subscribe(listener);
        assert_eq!(registry.listener_count(), 2);

        first.unsubscribe();
        assert_eq!(registry.listener_count(), 1);

        registry.publish(&event("x"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_does_not_skip() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handle_slot: Arc<Mutex<Option<SubscriberHandle>>> = Arc::new(Mutex::new(None));

        let o1 = Arc::clone(&order);
        let slot = Arc::clone(&handle_slot);
        let _first = registry.subscribe(move |_| {
            o1.lock().unwrap().push(1);
            if let Some(handle) = slot.lock().unwrap().take() {
                handle.unsubscribe();
            }
        });
        let o2 = Arc::clone(&order);
        let second = registry.subscribe(move |_| {
            o2.lock().unwrap().push(2);
        });
        *handle_slot.lock().unwrap() = Some(second);

        // The second listener is removed mid-dispatch but still sees this event.
        registry.publish(&event("x"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        registry.publish(&event("y"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let registry = SubscriberRegistry::new();
        registry.publish(&event("before"));

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let _handle = registry.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
