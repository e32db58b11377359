//! Global event bus.
//!
//! Handlers are invoked synchronously, in subscription order, on the task
//! that publishes. The handler list is snapshotted before dispatch so a
//! handler may subscribe or unsubscribe without deadlocking.

use crate::descriptor::RequestDescriptor;
use crate::error::InterceptorMismatch;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An interceptor matched a request
    Request,
    /// A mocked reply finished playing
    Replied,
    /// A request matched no interceptor
    NoMatch,
}

#[derive(Debug, Clone)]
pub enum InterceptEvent {
    Request {
        interceptor_id: u64,
        descriptor: RequestDescriptor,
    },
    Replied {
        interceptor_id: u64,
        descriptor: RequestDescriptor,
        status: u16,
    },
    NoMatch {
        descriptor: RequestDescriptor,
        mismatches: Vec<InterceptorMismatch>,
    },
}

impl InterceptEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InterceptEvent::Request { .. } => EventKind::Request,
            InterceptEvent::Replied { .. } => EventKind::Replied,
            InterceptEvent::NoMatch { .. } => EventKind::NoMatch,
        }
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        match self {
            InterceptEvent::Request { descriptor, .. }
            | InterceptEvent::Replied { descriptor, .. }
            | InterceptEvent::NoMatch { descriptor, .. } => descriptor,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&InterceptEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&InterceptEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn publish(&self, event: &InterceptEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn no_match() -> InterceptEvent {
        InterceptEvent::NoMatch {
            descriptor: RequestDescriptor::builder("GET", "http://example.test/")
                .build()
                .unwrap(),
            mismatches: Vec::new(),
        }
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = seen.clone();
            bus.subscribe(EventKind::NoMatch, move |_| seen.lock().push(n));
        }
        let other = seen.clone();
        bus.subscribe(EventKind::Request, move |_| other.lock().push(99));

        bus.publish(&no_match());
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = bus.subscribe(EventKind::NoMatch, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&no_match());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&no_match());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_resubscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.subscribe(EventKind::NoMatch, move |_| {
            inner.subscribe(EventKind::NoMatch, |_| {});
        });
        bus.publish(&no_match());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
