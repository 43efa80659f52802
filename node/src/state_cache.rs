//! Latest network view received from the master

use parking_lot::RwLock;
use shared::messages::{NetworkState, ServerSummary};
use shared::utils::current_millis;
use shared::{least_loaded_hint_key, STATE_STALE_THRESHOLD_MS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Holds the most recent [`NetworkState`] and when it arrived.
///
/// Snapshots are replaced wholesale on every update and never mutated, so
/// readers can keep an `Arc` to one without holding a lock.
#[derive(Debug)]
pub struct NetworkStateCache {
    state: RwLock<Option<Arc<NetworkState>>>,
    last_update: AtomicU64,
    stale_threshold_ms: u64,
}

impl NetworkStateCache {
    pub fn new(stale_threshold_ms: u64) -> Self {
        Self {
            state: RwLock::new(None),
            last_update: AtomicU64::new(0),
            stale_threshold_ms,
        }
    }

    pub fn update(&self, state: NetworkState) {
        self.update_at(state, current_millis());
    }

    pub fn update_at(&self, state: NetworkState, now: u64) {
        *self.state.write() = Some(Arc::new(state));
        self.last_update.store(now, Ordering::Release);
    }

    pub fn snapshot(&self) -> Option<Arc<NetworkState>> {
        self.state.read().clone()
    }

    fn with_state<R>(&self, default: R, f: impl FnOnce(&NetworkState) -> R) -> R {
        match self.state.read().as_deref() {
            Some(state) => f(state),
            None => default,
        }
    }

    pub fn global_online(&self) -> u32 {
        self.with_state(0, |s| s.global_online)
    }

    pub fn server_count(&self) -> u32 {
        self.with_state(0, |s| s.server_count)
    }

    pub fn version(&self) -> u64 {
        self.with_state(0, |s| s.state_version)
    }

    pub fn global_property(&self, key: &str) -> Option<String> {
        self.with_state(None, |s| s.global_properties.get(key).cloned())
    }

    pub fn routing_hint(&self, key: &str) -> Option<String> {
        self.with_state(None, |s| s.routing_hints.get(key).cloned())
    }

    /// Least-loaded server the master advertises for `category`
    pub fn least_loaded(&self, category: &str) -> Option<String> {
        self.routing_hint(&least_loaded_hint_key(category))
    }

    pub fn servers(&self) -> Vec<ServerSummary> {
        self.with_state(Vec::new(), |s| s.servers.clone())
    }

    /// Case-insensitive lookup by server name
    pub fn server(&self, name: &str) -> Option<ServerSummary> {
        self.with_state(None, |s| s.server(name).cloned())
    }

    pub fn server_online(&self, name: &str) -> u32 {
        self.server(name).map_or(0, |s| s.online_players)
    }

    pub fn server_max_players(&self, name: &str) -> u32 {
        self.server(name).map_or(0, |s| s.max_players)
    }

    pub fn server_tps(&self, name: &str) -> f64 {
        self.server(name).map_or(0.0, |s| s.tps)
    }

    pub fn is_server_online(&self, name: &str) -> bool {
        self.server(name)
            .map_or(false, |s| s.is_online(current_millis(), STATE_STALE_THRESHOLD_MS))
    }

    pub fn global_max_players(&self) -> u64 {
        self.with_state(0, |s| s.servers.iter().map(|srv| u64::from(srv.max_players)).sum())
    }

    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(current_millis())
    }

    /// True before the first update or once the view is older than the threshold
    pub fn is_stale_at(&self, now: u64) -> bool {
        let last = self.last_update();
        last == 0 || now.saturating_sub(last) > self.stale_threshold_ms
    }
}

impl Default for NetworkStateCache {
    fn default() -> Self {
        Self::new(STATE_STALE_THRESHOLD_MS)
    }
}
