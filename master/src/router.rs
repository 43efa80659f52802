//! Forwarding of node-to-node traffic through the master

use crate::registry::NodeRegistry;
use dashmap::DashMap;
use log::{debug, warn};
use shared::messages::EventBroadcast;
use shared::Packet;
use std::collections::HashSet;
use std::sync::Arc;

/// Subscription key matching every event type
pub const WILDCARD: &str = "*";

/// Routes cross-server events and targeted packets between nodes
///
/// Event types with registered subscribers go only to those nodes and to
/// nodes subscribed to `"*"`; all other events go to every node. The
/// sending node never receives its own event back.
pub struct EventRouter {
    registry: Arc<NodeRegistry>,
    subscriptions: DashMap<String, HashSet<String>>,
}

impl EventRouter {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            subscriptions: DashMap::new(),
        }
    }

    pub fn register_subscription(&self, event_type: &str, node_id: &str) {
        self.subscriptions
            .entry(event_type.to_string())
            .or_default()
            .insert(node_id.to_string());
    }

    pub fn unregister_subscription(&self, event_type: &str, node_id: &str) -> bool {
        self.subscriptions
            .get_mut(event_type)
            .map_or(false, |mut nodes| nodes.remove(node_id))
    }

    pub fn subscribers(&self, event_type: &str) -> Vec<String> {
        self.subscriptions
            .get(event_type)
            .map(|nodes| nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers an event from `source` and returns how many nodes it was queued for
    ///
    /// `source` is the authenticated sender, not the `source_server` field
    /// the peer put on the wire.
    pub fn route_event(&self, source: &str, event: &EventBroadcast) -> usize {
        let typed = self.subscribers(&event.event_type);
        if typed.is_empty() {
            return self.broadcast_except(Packet::EventBroadcast(event.clone()), source);
        }

        let targets: HashSet<String> = typed.into_iter().chain(self.subscribers(WILDCARD)).collect();
        targets
            .iter()
            .filter(|node| node.as_str() != source)
            .filter(|node| self.send_to(node, Packet::EventBroadcast(event.clone())))
            .count()
    }

    /// Queues `packet` for every active node except `source`
    pub fn broadcast_except(&self, packet: Packet, source: &str) -> usize {
        let mut delivered = 0;
        for session in self.registry.all() {
            if session.node_id == source || !session.is_active() {
                continue;
            }
            if session.send(packet.clone()) {
                delivered += 1;
            }
        }
        debug!("Relayed {} from {} to {} nodes", packet.name(), source, delivered);
        delivered
    }

    /// Queues `packet` for one node if it is connected
    pub fn send_to(&self, node_id: &str, packet: Packet) -> bool {
        match self.registry.get(node_id) {
            Some(session) if session.is_active() => session.send(packet),
            _ => {
                warn!("Cannot deliver {} to {}: node not connected", packet.name(), node_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, NodeSession};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn add_node(registry: &NodeRegistry, node_id: &str) -> mpsc::UnboundedReceiver<Packet> {
        let (handle, rx) = ConnectionHandle::channel(registry.count() as u64 + 1);
        registry.register(Arc::new(NodeSession::new(node_id, "127.0.0.1:1".parse().unwrap(), handle)));
        rx
    }

    fn event(event_type: &str, source: &str) -> EventBroadcast {
        EventBroadcast {
            event_type: event_type.to_string(),
            source_server: source.to_string(),
            player: None,
            player_groups: Vec::new(),
            data: HashMap::new(),
            timestamp: 1,
        }
    }

    #[test]
    fn test_unsubscribed_event_goes_to_everyone_but_source() {
        let registry = Arc::new(NodeRegistry::new());
        let mut a = add_node(&registry, "a");
        let mut b = add_node(&registry, "b");
        let mut c = add_node(&registry, "c");
        let router = EventRouter::new(Arc::clone(&registry));

        assert_eq!(router.route_event("a", &event("join", "a")), 2);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_ok());
    }

    #[test]
    fn test_subscribed_event_goes_only_to_subscribers() {
        let registry = Arc::new(NodeRegistry::new());
        let mut a = add_node(&registry, "a");
        let mut b = add_node(&registry, "b");
        let mut c = add_node(&registry, "c");
        let router = EventRouter::new(Arc::clone(&registry));
        router.register_subscription("join", "a");
        router.register_subscription("join", "c");

        assert_eq!(router.route_event("a", &event("join", "a")), 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
        assert!(c.try_recv().is_ok());
    }

    #[test]
    fn test_unregister_subscription() {
        let registry = Arc::new(NodeRegistry::new());
        let router = EventRouter::new(registry);
        router.register_subscription("join", "a");
        assert!(router.unregister_subscription("join", "a"));
        assert!(!router.unregister_subscription("join", "a"));
        assert!(router.subscribers("join").is_empty());
    }

    #[test]
    fn test_send_to_unknown_node_fails() {
        let registry = Arc::new(NodeRegistry::new());
        let router = EventRouter::new(registry);
        assert!(!router.send_to("ghost", Packet::EventBroadcast(event("x", "a"))));
    }

    #[test]
    fn test_wildcard_subscriber_receives_typed_events() {
        let registry = Arc::new(NodeRegistry::new());
        let mut a = add_node(&registry, "a");
        let mut b = add_node(&registry, "b");
        let mut c = add_node(&registry, "c");
        let mut d = add_node(&registry, "d");
        let router = EventRouter::new(Arc::clone(&registry));
        router.register_subscription("join", "b");
        router.register_subscription(WILDCARD, "c");
        router.register_subscription(WILDCARD, "a");

        assert_eq!(router.route_event("a", &event("join", "a")), 2);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_ok());
        assert!(d.try_recv().is_err());
    }

    #[test]
    fn test_node_subscribed_both_ways_gets_one_copy() {
        let registry = Arc::new(NodeRegistry::new());
        let _a = add_node(&registry, "a");
        let mut b = add_node(&registry, "b");
        let router = EventRouter::new(Arc::clone(&registry));
        router.register_subscription("join", "b");
        router.register_subscription(WILDCARD, "b");

        assert_eq!(router.route_event("a", &event("join", "a")), 1);
        assert!(b.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_sender_excluded_by_session_not_wire_field() {
        let registry = Arc::new(NodeRegistry::new());
        let mut a = add_node(&registry, "a");
        let mut b = add_node(&registry, "b");
        let mut c = add_node(&registry, "c");
        let router = EventRouter::new(Arc::clone(&registry));

        // "a" claims to be "b" on the wire
        assert_eq!(router.route_event("a", &event("join", "b")), 2);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_ok());

        router.register_subscription("join", "a");
        router.register_subscription("join", "b");
        assert_eq!(router.route_event("a", &event("join", "b")), 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }
}
