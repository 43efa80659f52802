//! In-process publish/subscribe for lifecycle notifications
//!
//! An [`EventBus`] is created once by whoever assembles the runtime and handed
//! to every component that publishes or subscribes. Cloning the bus yields
//! another handle to the same subscriber table.

use crate::messages::{ChunkData, PortalSync, TransferRequest};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Degraded,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    NetworkStateChanged {
        global_online: u32,
        server_count: u32,
        version: u64,
        timestamp: u64,
    },
    NodeConnected {
        node_id: String,
        remote_addr: SocketAddr,
        timestamp: u64,
    },
    NodeDisconnected {
        node_id: String,
        reason: String,
        timestamp: u64,
    },
    AuthenticationCompleted {
        node_id: String,
        success: bool,
        reason: Option<String>,
        timestamp: u64,
    },
    CircuitBreakerTripped {
        node_id: Option<String>,
        reason: String,
        duration_ms: u64,
        timestamp: u64,
    },
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    TransferRequested(TransferRequest),
    PortalsSynced(PortalSync),
    ChunkReceived(ChunkData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NetworkStateChanged,
    NodeConnected,
    NodeDisconnected,
    AuthenticationCompleted,
    CircuitBreakerTripped,
    ConnectionStateChanged,
    TransferRequested,
    PortalsSynced,
    ChunkReceived,
}

impl FleetEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FleetEvent::NetworkStateChanged { .. } => EventKind::NetworkStateChanged,
            FleetEvent::NodeConnected { .. } => EventKind::NodeConnected,
            FleetEvent::NodeDisconnected { .. } => EventKind::NodeDisconnected,
            FleetEvent::AuthenticationCompleted { .. } => EventKind::AuthenticationCompleted,
            FleetEvent::CircuitBreakerTripped { .. } => EventKind::CircuitBreakerTripped,
            FleetEvent::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            FleetEvent::TransferRequested(_) => EventKind::TransferRequested,
            FleetEvent::PortalsSynced(_) => EventKind::PortalsSynced,
            FleetEvent::ChunkReceived(_) => EventKind::ChunkReceived,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&FleetEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.add(Some(kind), Arc::new(handler))
    }

    /// Registers `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Invokes every matching handler in subscription order on the caller's thread.
    pub fn publish(&self, event: &FleetEvent) {
        let kind = event.kind();
        // Handlers run outside the lock so they may subscribe or publish themselves
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn clear(&self) {
        self.inner.subscribers.write().clear();
    }

    fn add(&self, kind: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscriber { id, kind, handler });
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn disconnected(node: &str) -> FleetEvent {
        FleetEvent::NodeDisconnected {
            node_id: node.to_string(),
            reason: "closed".to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_subscribe_by_kind_filters_events() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::NodeDisconnected, move |event| {
            sink.lock().push(event.clone());
        });

        bus.publish(&disconnected("a"));
        bus.publish(&FleetEvent::ConnectionStateChanged {
            previous: ConnectionState::Connecting,
            current: ConnectionState::Authenticating,
        });

        assert_eq!(seen.lock().as_slice(), &[disconnected("a")]);
    }

    #[test]
    fn test_subscribe_all_sees_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&disconnected("a"));
        bus.publish(&disconnected("b"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&disconnected("a"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let other = bus.clone();
        other.subscribe_all(|_| {});
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_handler_may_publish_reentrantly() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe(EventKind::NodeConnected, move |_| {
            inner_bus.publish(&disconnected("x"));
        });
        bus.subscribe(EventKind::NodeDisconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&FleetEvent::NodeConnected {
            node_id: "x".to_string(),
            remote_addr: "127.0.0.1:1".parse().unwrap(),
            timestamp: 0,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
