//! Node session tracking for the master
//!
//! This module holds the master-side view of every authenticated node:
//! - Connection handles used to queue outbound packets
//! - Last-reported metrics (player counts, tick rate, extra data)
//! - Dirty tracking consumed by the state broadcaster
//! - Liveness timestamps used for timeout eviction
//!
//! The registry is a concurrent map with per-entry locking, so connection
//! tasks can register, update and remove nodes without a global lock.

use dashmap::DashMap;
use parking_lot::Mutex;
use shared::messages::{NodeSnapshot, ServerSummary};
use shared::utils::current_millis;
use shared::Packet;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound side of one node connection
///
/// Packets are queued on an unbounded channel drained by a single writer
/// task, so any task may send without interleaving frames. Closing the
/// handle cancels the connection's reader and writer.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<Packet>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: u64, outbound: mpsc::UnboundedSender<Packet>, cancel: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            cancel,
        }
    }

    /// Creates a handle together with the receiving end of its queue
    pub fn channel(id: u64) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx, CancellationToken::new()), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues a packet for the writer task
    ///
    /// Returns false if the connection is closed or its writer has exited.
    pub fn send(&self, packet: Packet) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.outbound.send(packet).is_ok()
    }

    /// Returns true while the transport can still carry packets
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }

    /// Requests the connection to close after flushing queued packets
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Last-reported metrics of a node
///
/// Mutated only by the owning connection (snapshots and heartbeats); the
/// dirty flag is cleared as the broadcaster copies the state into a summary.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    /// Capture time reported by the node, or local time of the last heartbeat
    pub last_update: u64,
    pub extra_data: HashMap<String, String>,
    /// Counters from the most recent metrics report
    pub counters: HashMap<String, u64>,
    dirty: bool,
    last_seen: Instant,
    breaker_until: u64,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            online_players: 0,
            max_players: 0,
            tps: 20.0,
            last_update: current_millis(),
            extra_data: HashMap::new(),
            counters: HashMap::new(),
            dirty: false,
            last_seen: Instant::now(),
            breaker_until: 0,
        }
    }
}

impl NodeState {
    /// Replaces all reported metrics with the snapshot contents
    pub fn update_from_snapshot(&mut self, snapshot: &NodeSnapshot) {
        self.online_players = snapshot.online_players;
        self.max_players = snapshot.max_players;
        self.tps = snapshot.tps;
        self.last_update = snapshot.capture_timestamp;
        self.extra_data = snapshot.extra_data.clone();
        self.dirty = true;
        self.last_seen = Instant::now();
    }

    /// Records liveness without touching reported metrics
    pub fn update_heartbeat(&mut self) {
        self.last_update = current_millis();
        self.last_seen = Instant::now();
    }

    pub fn record_counters(&mut self, counters: &HashMap<String, u64>) {
        self.counters = counters.clone();
        self.last_seen = Instant::now();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Checks if no heartbeat or snapshot arrived within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn breaker_active(&self, now: u64) -> bool {
        now < self.breaker_until
    }

    pub fn set_breaker_until(&mut self, until: u64) {
        self.breaker_until = until;
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_seen(&mut self, by: Duration) {
        if let Some(earlier) = Instant::now().checked_sub(by) {
            self.last_seen = earlier;
        }
    }
}

/// One authenticated node connection
#[derive(Debug)]
pub struct NodeSession {
    pub node_id: String,
    pub remote_addr: SocketAddr,
    pub connected_at: u64,
    connection: ConnectionHandle,
    state: Mutex<NodeState>,
}

impl NodeSession {
    pub fn new(node_id: impl Into<String>, remote_addr: SocketAddr, connection: ConnectionHandle) -> Self {
        Self {
            node_id: node_id.into(),
            remote_addr,
            connected_at: current_millis(),
            connection,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn send(&self, packet: Packet) -> bool {
        self.connection.send(packet)
    }

    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    /// Runs `f` with exclusive access to the node state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut *self.state.lock())
    }

    pub fn state(&self) -> NodeState {
        self.state.lock().clone()
    }

    /// Copies the current state into a wire summary
    pub fn summary(&self) -> ServerSummary {
        self.summarize(&self.state.lock())
    }

    /// Copies the current state into a wire summary and clears its dirty
    /// mark under the same lock
    pub fn take_summary(&self) -> ServerSummary {
        let mut state = self.state.lock();
        state.clear_dirty();
        self.summarize(&state)
    }

    fn summarize(&self, state: &NodeState) -> ServerSummary {
        ServerSummary {
            name: self.node_id.clone(),
            online_players: state.online_players,
            max_players: state.max_players,
            tps: state.tps,
            last_update: state.last_update,
            extra_data: state.extra_data.clone(),
        }
    }
}

/// Concurrent table of authenticated nodes keyed by node id
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<NodeSession>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, replacing any existing entry with the same id
    ///
    /// Callers are expected to have rejected duplicates already; use
    /// [`NodeRegistry::try_register`] when the check must be atomic.
    pub fn register(&self, session: Arc<NodeSession>) {
        self.nodes.insert(session.node_id.clone(), session);
    }

    /// Inserts a session only if no node with the same id is registered
    ///
    /// Returns false and leaves the existing session untouched otherwise.
    pub fn try_register(&self, session: Arc<NodeSession>) -> bool {
        match self.nodes.entry(session.node_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Removes a node; removing an unknown id is a no-op
    pub fn unregister(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        self.nodes.remove(node_id).map(|(_, session)| session)
    }

    /// Removes a node only if it is still backed by the given connection
    ///
    /// Guards against a late disconnect removing a newer session that
    /// reused the same node id.
    pub fn unregister_connection(&self, node_id: &str, connection_id: u64) -> Option<Arc<NodeSession>> {
        self.nodes
            .remove_if(node_id, |_, session| session.connection.id() == connection_id)
            .map(|(_, session)| session)
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        self.nodes.get(node_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Snapshot of all sessions at the time of the call
    pub fn all(&self) -> Vec<Arc<NodeSession>> {
        self.nodes.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of reported online players over all nodes
    pub fn total_online(&self) -> u32 {
        self.nodes
            .iter()
            .map(|entry| entry.value().with_state(|state| state.online_players))
            .sum()
    }

    pub fn has_any_dirty(&self) -> bool {
        self.nodes
            .iter()
            .any(|entry| entry.value().with_state(|state| state.is_dirty()))
    }

    /// Sessions whose transport closed or that missed the liveness window
    pub fn dead_sessions(&self, timeout: Duration) -> Vec<Arc<NodeSession>> {
        self.nodes
            .iter()
            .filter(|entry| {
                let session = entry.value();
                !session.is_active() || session.with_state(|state| state.is_timed_out(timeout))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
