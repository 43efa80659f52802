//! Facade exposed to the game server embedding the node

use crate::balancer::LoadBalancerService;
use crate::event_bridge::EventBridge;
use crate::kv::DistributedKv;
use crate::network::{ConnectionStatus, NodeClient};
use shared::messages::ServerSummary;
use shared::{EventKind, FleetEvent, SubscriptionId};
use std::sync::Arc;

/// Chooses which optional services a [`FleetApi`] carries.
pub struct FleetApiBuilder {
    client: Arc<NodeClient>,
    load_balancer: bool,
    kv: bool,
    event_bridge: bool,
}

impl FleetApiBuilder {
    pub fn load_balancer(mut self) -> Self {
        self.load_balancer = true;
        self
    }

    pub fn kv(mut self) -> Self {
        self.kv = true;
        self
    }

    pub fn event_bridge(mut self) -> Self {
        self.event_bridge = true;
        self
    }

    /// Creates the selected services and wires their inbound traffic into the client.
    pub fn build(self) -> FleetApi {
        let client = self.client;
        let name = client.node_name().to_string();

        let load_balancer = self
            .load_balancer
            .then(|| Arc::new(LoadBalancerService::new(Arc::clone(client.state_cache()))));

        let kv = self.kv.then(|| {
            let kv = Arc::new(DistributedKv::new(client.outbound(), name.clone()));
            client.attach_kv(Arc::clone(&kv));
            kv
        });

        let event_bridge = self.event_bridge.then(|| {
            let bridge = Arc::new(EventBridge::new(client.outbound(), name.clone()));
            client.attach_event_bridge(Arc::clone(&bridge));
            bridge
        });

        FleetApi {
            client,
            load_balancer,
            kv,
            event_bridge,
        }
    }
}

/// Query and control surface over one node's view of the fleet
pub struct FleetApi {
    client: Arc<NodeClient>,
    load_balancer: Option<Arc<LoadBalancerService>>,
    kv: Option<Arc<DistributedKv>>,
    event_bridge: Option<Arc<EventBridge>>,
}

impl FleetApi {
    pub fn builder(client: Arc<NodeClient>) -> FleetApiBuilder {
        FleetApiBuilder {
            client,
            load_balancer: false,
            kv: false,
            event_bridge: false,
        }
    }

    pub fn client(&self) -> &Arc<NodeClient> {
        &self.client
    }

    pub fn has_load_balancer(&self) -> bool {
        self.load_balancer.is_some()
    }

    pub fn has_kv(&self) -> bool {
        self.kv.is_some()
    }

    pub fn has_event_bridge(&self) -> bool {
        self.event_bridge.is_some()
    }

    pub fn load_balancer(&self) -> Option<&Arc<LoadBalancerService>> {
        self.load_balancer.as_ref()
    }

    pub fn kv(&self) -> Option<&Arc<DistributedKv>> {
        self.kv.as_ref()
    }

    pub fn event_bridge(&self) -> Option<&Arc<EventBridge>> {
        self.event_bridge.as_ref()
    }

    pub fn global_online(&self) -> u32 {
        self.client.state_cache().global_online()
    }

    pub fn global_max_players(&self) -> u64 {
        self.client.state_cache().global_max_players()
    }

    pub fn server_count(&self) -> u32 {
        self.client.state_cache().server_count()
    }

    pub fn state_version(&self) -> u64 {
        self.client.state_cache().version()
    }

    pub fn global_property(&self, key: &str) -> Option<String> {
        self.client.state_cache().global_property(key)
    }

    pub fn routing_hint(&self, key: &str) -> Option<String> {
        self.client.state_cache().routing_hint(key)
    }

    pub fn least_loaded(&self, category: &str) -> Option<String> {
        self.client.state_cache().least_loaded(category)
    }

    pub fn servers(&self) -> Vec<ServerSummary> {
        self.client.state_cache().servers()
    }

    pub fn server(&self, name: &str) -> Option<ServerSummary> {
        self.client.state_cache().server(name)
    }

    pub fn server_online(&self, name: &str) -> u32 {
        self.client.state_cache().server_online(name)
    }

    pub fn server_max_players(&self, name: &str) -> u32 {
        self.client.state_cache().server_max_players(name)
    }

    pub fn server_tps(&self, name: &str) -> f64 {
        self.client.state_cache().server_tps(name)
    }

    pub fn is_server_online(&self, name: &str) -> bool {
        self.client.state_cache().is_server_online(name)
    }

    pub fn is_stale(&self) -> bool {
        self.client.state_cache().is_stale()
    }

    /// Adds node metadata to every following snapshot.
    pub fn set_extra_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.client.collector().set_extra_data(key, value);
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.client.connection_status()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.client.events().subscribe(kind, handler)
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.client.events().subscribe_all(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.client.events().unsubscribe(id)
    }
}
