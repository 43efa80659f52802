//! Versioned global state fan-out
//!
//! The broadcaster owns the state version counter. Periodic ticks and
//! emergency broadcasts both run on the broadcaster task, and every broadcast
//! takes the same lock, so versions increase by exactly one per broadcast and
//! are never reused.

use crate::config::MasterConfig;
use crate::registry::{NodeRegistry, NodeSession, NodeState};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::messages::{CircuitBreakerTripped, NetworkState};
use shared::utils::current_millis;
use shared::{least_loaded_hint_key, EventBus, FleetEvent, Packet, GAME_TYPE_KEY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Instruction to silence a node's telemetry for a while
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripDirective {
    pub drop_priority_threshold: i32,
    pub duration: Duration,
    pub reason: String,
}

/// Decides whether a node should be asked to stop sending telemetry
///
/// Evaluated for every active node on each broadcaster tick. Nodes whose
/// previous trip is still running are skipped.
pub trait TripPolicy: Send + Sync {
    fn evaluate(&self, session: &NodeSession, state: &NodeState) -> Option<TripDirective>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverTrip;

impl TripPolicy for NeverTrip {
    fn evaluate(&self, _session: &NodeSession, _state: &NodeState) -> Option<TripDirective> {
        None
    }
}

pub struct StateBroadcaster {
    registry: Arc<NodeRegistry>,
    events: EventBus,
    version: AtomicU64,
    ttl_seconds: u32,
    heartbeat_timeout: Duration,
    global_properties: RwLock<HashMap<String, String>>,
    trip_policy: RwLock<Arc<dyn TripPolicy>>,
    emergency: Notify,
    broadcast_lock: Mutex<()>,
}

impl StateBroadcaster {
    pub fn new(registry: Arc<NodeRegistry>, events: EventBus, config: &MasterConfig) -> Self {
        Self {
            registry,
            events,
            version: AtomicU64::new(0),
            ttl_seconds: config.state_ttl_seconds(),
            heartbeat_timeout: config.heartbeat_timeout(),
            global_properties: RwLock::new(HashMap::new()),
            trip_policy: RwLock::new(Arc::new(NeverTrip)),
            emergency: Notify::new(),
            broadcast_lock: Mutex::new(()),
        }
    }

    /// Version of the most recent broadcast, 0 before the first one
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn set_global_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.global_properties.write().insert(key.into(), value.into());
    }

    pub fn remove_global_property(&self, key: &str) -> Option<String> {
        self.global_properties.write().remove(key)
    }

    pub fn set_trip_policy(&self, policy: Arc<dyn TripPolicy>) {
        *self.trip_policy.write() = policy;
    }

    /// Asks the broadcaster task to broadcast now instead of at the next tick
    pub fn trigger_emergency_broadcast(&self) {
        self.emergency.notify_one();
    }

    /// Periodic work: evict dead nodes, apply the trip policy, and broadcast
    /// if any node is connected or dirty.
    pub fn tick(&self) -> Option<NetworkState> {
        self.evict_dead_sessions();
        self.apply_trip_policy();

        if self.registry.has_any_dirty() || self.registry.count() > 0 {
            Some(self.broadcast())
        } else {
            None
        }
    }

    /// Builds a new snapshot and sends it to every active node
    pub fn broadcast(&self) -> NetworkState {
        let _guard = self.broadcast_lock.lock();
        let state = self.build_state();
        let packet = Packet::NetworkState(state.clone());

        let sessions = self.registry.all();
        let mut delivered = 0;
        for session in &sessions {
            if !session.is_active() {
                continue;
            }
            if session.send(packet.clone()) {
                delivered += 1;
            } else {
                warn!("Failed to queue state v{} for {}", state.state_version, session.node_id);
            }
        }

        debug!(
            "Broadcast state v{} to {}/{} nodes: {} global players",
            state.state_version,
            delivered,
            sessions.len(),
            state.global_online
        );
        state
    }

    fn build_state(&self) -> NetworkState {
        let servers: Vec<_> = self.registry.all().iter().map(|session| session.take_summary()).collect();
        let global_online = servers.iter().map(|server| server.online_players).sum();

        let mut least_loaded: HashMap<&str, (&str, u32)> = HashMap::new();
        for server in &servers {
            if let Some(game_type) = server.extra_data.get(GAME_TYPE_KEY) {
                let entry = least_loaded
                    .entry(game_type.as_str())
                    .or_insert((server.name.as_str(), server.online_players));
                if server.online_players < entry.1 {
                    *entry = (server.name.as_str(), server.online_players);
                }
            }
        }
        let routing_hints = least_loaded
            .into_iter()
            .map(|(game_type, (node, _))| (least_loaded_hint_key(game_type), node.to_string()))
            .collect();

        NetworkState {
            global_online,
            server_count: servers.len() as u32,
            state_version: self.version.fetch_add(1, Ordering::AcqRel) + 1,
            ttl_seconds: self.ttl_seconds,
            global_properties: self.global_properties.read().clone(),
            routing_hints,
            servers,
        }
    }

    /// Removes nodes whose transport closed or that stopped reporting
    pub fn evict_dead_sessions(&self) -> Vec<String> {
        let mut evicted = Vec::new();
        for session in self.registry.dead_sessions(self.heartbeat_timeout) {
            let reason = if session.is_active() {
                "Heartbeat timeout"
            } else {
                "Connection inactive"
            };
            if self
                .registry
                .unregister_connection(&session.node_id, session.connection().id())
                .is_none()
            {
                continue;
            }

            warn!("Evicting node {}: {}", session.node_id, reason);
            session.connection().close();
            self.events.publish(&FleetEvent::NodeDisconnected {
                node_id: session.node_id.clone(),
                reason: reason.to_string(),
                timestamp: current_millis(),
            });
            evicted.push(session.node_id.clone());
        }
        evicted
    }

    fn apply_trip_policy(&self) {
        let policy = Arc::clone(&self.trip_policy.read());
        let now = current_millis();
        for session in self.registry.all() {
            if !session.is_active() {
                continue;
            }
            let state = session.state();
            if state.breaker_active(now) {
                continue;
            }
            if let Some(directive) = policy.evaluate(&session, &state) {
                self.trip(&session, directive);
            }
        }
    }

    /// Sends a breaker directive to one node
    pub fn trip(&self, session: &NodeSession, directive: TripDirective) -> bool {
        let now = current_millis();
        let duration_ms = directive.duration.as_millis() as u64;
        session.with_state(|state| state.set_breaker_until(now + duration_ms));

        warn!(
            "Tripping circuit breaker for {} for {}ms: {}",
            session.node_id, duration_ms, directive.reason
        );
        let sent = session.send(Packet::CircuitBreakerTripped(CircuitBreakerTripped {
            drop_priority_threshold: directive.drop_priority_threshold,
            duration_ms,
            reason: directive.reason.clone(),
        }));
        self.events.publish(&FleetEvent::CircuitBreakerTripped {
            node_id: Some(session.node_id.clone()),
            reason: directive.reason,
            duration_ms,
            timestamp: now,
        });
        sent
    }

    /// Broadcast loop; runs until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;
        info!("State broadcaster started with {}ms interval", period.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                _ = self.emergency.notified() => {
                    debug!("Emergency broadcast");
                    self.broadcast();
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("State broadcaster stopped");
    }
}
