//! Cross-server gameplay events relayed through the master

use crate::outbound::Outbound;
use log::debug;
use parking_lot::RwLock;
use shared::messages::{EventBroadcast, EventPlayer};
use shared::utils::current_millis;
use shared::Packet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Subscribes to every event type.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    FromSource(String),
    ExcludeSelf,
    /// Player belongs to at least one of the groups
    InAnyGroup(Vec<String>),
}

impl EventFilter {
    fn accepts(&self, event: &EventBroadcast, own_name: &str) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::FromSource(source) => event.source_server.eq_ignore_ascii_case(source),
            EventFilter::ExcludeSelf => !event.source_server.eq_ignore_ascii_case(own_name),
            EventFilter::InAnyGroup(groups) => event.matches_groups(groups),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeSubscription(u64);

type Handler = Arc<dyn Fn(&EventBroadcast) + Send + Sync>;

struct Subscriber {
    id: BridgeSubscription,
    filter: EventFilter,
    handler: Handler,
}

pub struct EventBridge {
    outbound: Outbound,
    node_name: String,
    subscriptions: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBridge {
    pub fn new(outbound: Outbound, node_name: impl Into<String>) -> Self {
        Self {
            outbound,
            node_name: node_name.into(),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends an event to the master for fan-out to other servers.
    pub fn publish(
        &self,
        event_type: &str,
        player: Option<EventPlayer>,
        player_groups: Vec<String>,
        data: HashMap<String, String>,
    ) -> bool {
        self.outbound.send(Packet::EventBroadcast(EventBroadcast {
            event_type: event_type.to_string(),
            source_server: self.node_name.clone(),
            player,
            player_groups,
            data,
            timestamp: current_millis(),
        }))
    }

    pub fn publish_data(&self, event_type: &str, data: HashMap<String, String>) -> bool {
        self.publish(event_type, None, Vec::new(), data)
    }

    pub fn subscribe<F>(&self, event_type: &str, filter: EventFilter, handler: F) -> BridgeSubscription
    where
        F: Fn(&EventBroadcast) + Send + Sync + 'static,
    {
        let id = BridgeSubscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Subscriber {
                id,
                filter,
                handler: Arc::new(handler),
            });
        id
    }

    pub fn subscribe_to_server<F>(&self, server: &str, event_type: &str, handler: F) -> BridgeSubscription
    where
        F: Fn(&EventBroadcast) + Send + Sync + 'static,
    {
        self.subscribe(event_type, EventFilter::FromSource(server.to_string()), handler)
    }

    pub fn unsubscribe(&self, id: BridgeSubscription) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = false;
        for subscribers in subscriptions.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed |= subscribers.len() != before;
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        removed
    }

    /// Delivers an event from the master to matching subscribers.
    ///
    /// Exact-type subscribers run first, then wildcard subscribers.
    pub fn handle_incoming(&self, event: &EventBroadcast) -> usize {
        let handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.read();
            [event.event_type.as_str(), WILDCARD]
                .iter()
                .filter_map(|key| subscriptions.get(*key))
                .flatten()
                .filter(|s| s.filter.accepts(event, &self.node_name))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        if handlers.is_empty() {
            debug!("No subscribers for event {} from {}", event.event_type, event.source_server);
        }
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}
