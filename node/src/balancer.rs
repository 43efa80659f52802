//! Server selection over the cached network view

use crate::state_cache::NetworkStateCache;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use shared::utils::current_millis;
use shared::STATE_STALE_THRESHOLD_MS;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancingStrategy {
    RoundRobin,
    #[default]
    LeastConnections,
    LeastTpsLoad,
    Weighted,
    Random,
    PriorityQueue,
}

/// Load figures of one server as the balancer sees them.
///
/// `online_players` already includes unexpired slot reservations.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMetrics {
    pub server_name: String,
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    pub weight: u32,
    pub last_update: u64,
    pub available: bool,
}

impl ServerMetrics {
    fn unknown(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            online_players: 0,
            max_players: 0,
            tps: 0.0,
            weight: 1,
            last_update: 0,
            available: false,
        }
    }

    pub fn load_factor(&self) -> f64 {
        if self.max_players == 0 {
            return 1.0;
        }
        f64::from(self.online_players) / f64::from(self.max_players)
    }

    pub fn tps_load_factor(&self) -> f64 {
        (1.0 - self.tps / 20.0).max(0.0)
    }

    pub fn has_space(&self) -> bool {
        self.available && self.online_players < self.max_players
    }

    pub fn available_slots(&self) -> u32 {
        self.max_players.saturating_sub(self.online_players)
    }
}

/// Weight function for [`BalancingStrategy::Weighted`]
pub trait WeightProvider: Send + Sync {
    fn weight(&self, server_name: &str, metrics: &ServerMetrics) -> u32;
}

impl<F> WeightProvider for F
where
    F: Fn(&str, &ServerMetrics) -> u32 + Send + Sync,
{
    fn weight(&self, server_name: &str, metrics: &ServerMetrics) -> u32 {
        self(server_name, metrics)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedWeight(pub u32);

impl WeightProvider for FixedWeight {
    fn weight(&self, _server_name: &str, _metrics: &ServerMetrics) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AvailableSlotsWeight;

impl WeightProvider for AvailableSlotsWeight {
    fn weight(&self, _server_name: &str, metrics: &ServerMetrics) -> u32 {
        metrics.available_slots()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TpsWeight;

impl WeightProvider for TpsWeight {
    fn weight(&self, _server_name: &str, metrics: &ServerMetrics) -> u32 {
        (metrics.tps * 5.0) as u32
    }
}

/// Picks a target server for a player among named candidates.
///
/// Candidates without spare capacity are filtered out first; an empty result
/// means no candidate can take the player.
pub struct LoadBalancerService {
    cache: Arc<NetworkStateCache>,
    priorities: DashMap<Uuid, i32>,
    reservations: DashMap<String, HashMap<Uuid, u64>>,
    round_robin: AtomicUsize,
    default_strategy: RwLock<BalancingStrategy>,
    weight_provider: RwLock<Arc<dyn WeightProvider>>,
}

impl LoadBalancerService {
    pub fn new(cache: Arc<NetworkStateCache>) -> Self {
        Self {
            cache,
            priorities: DashMap::new(),
            reservations: DashMap::new(),
            round_robin: AtomicUsize::new(0),
            default_strategy: RwLock::new(BalancingStrategy::default()),
            weight_provider: RwLock::new(Arc::new(AvailableSlotsWeight)),
        }
    }

    pub fn select_server<S: AsRef<str>>(&self, player: Uuid, candidates: &[S]) -> Option<String> {
        self.select_server_with(player, candidates, self.default_strategy())
    }

    pub fn select_server_with<S: AsRef<str>>(
        &self,
        player: Uuid,
        candidates: &[S],
        strategy: BalancingStrategy,
    ) -> Option<String> {
        let available: Vec<ServerMetrics> = candidates
            .iter()
            .map(|name| self.server_metrics(name.as_ref()))
            .filter(ServerMetrics::has_space)
            .collect();

        if available.is_empty() {
            return None;
        }

        let chosen = match strategy {
            BalancingStrategy::RoundRobin => self.select_round_robin(&available),
            BalancingStrategy::LeastConnections => select_least_connections(&available),
            BalancingStrategy::LeastTpsLoad => select_least_tps_load(&available),
            BalancingStrategy::Weighted => self.select_weighted(&available),
            BalancingStrategy::Random => select_random(&available),
            BalancingStrategy::PriorityQueue => self.select_with_priority(player, &available),
        };
        Some(chosen.server_name.clone())
    }

    fn select_round_robin<'a>(&self, available: &'a [ServerMetrics]) -> &'a ServerMetrics {
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % available.len();
        &available[index]
    }

    fn select_weighted<'a>(&self, available: &'a [ServerMetrics]) -> &'a ServerMetrics {
        let provider = Arc::clone(&*self.weight_provider.read());
        let weights: Vec<u64> = available
            .iter()
            .map(|m| u64::from(provider.weight(&m.server_name, m)))
            .collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return select_random(available);
        }

        let draw = rand::thread_rng().gen_range(0..total);
        let mut cumulative = 0;
        for (metrics, weight) in available.iter().zip(&weights) {
            cumulative += weight;
            if draw < cumulative {
                return metrics;
            }
        }
        &available[0]
    }

    fn select_with_priority<'a>(&self, player: Uuid, available: &'a [ServerMetrics]) -> &'a ServerMetrics {
        if self.player_priority(player) > 0 {
            return first_best(available, |candidate, best| {
                candidate.load_factor() < best.load_factor()
            });
        }
        select_least_connections(available)
    }

    pub fn set_default_strategy(&self, strategy: BalancingStrategy) {
        *self.default_strategy.write() = strategy;
    }

    pub fn default_strategy(&self) -> BalancingStrategy {
        *self.default_strategy.read()
    }

    pub fn set_weight_provider(&self, provider: Arc<dyn WeightProvider>) {
        *self.weight_provider.write() = provider;
    }

    /// Non-positive priorities clear the entry.
    pub fn set_player_priority(&self, player: Uuid, priority: i32) {
        if priority <= 0 {
            self.priorities.remove(&player);
        } else {
            self.priorities.insert(player, priority);
        }
    }

    pub fn player_priority(&self, player: Uuid) -> i32 {
        self.priorities.get(&player).map_or(0, |p| *p)
    }

    pub fn clear_player_priority(&self, player: Uuid) {
        self.priorities.remove(&player);
    }

    /// Holds a slot on `server_name` for `player` until `duration` elapses.
    pub fn reserve_slot(&self, server_name: &str, player: Uuid, duration: Duration) {
        let expires_at = current_millis().saturating_add(duration.as_millis() as u64);
        self.reservations
            .entry(server_name.to_string())
            .or_default()
            .insert(player, expires_at);
    }

    pub fn release_slot(&self, server_name: &str, player: Uuid) -> bool {
        self.reservations
            .get_mut(server_name)
            .map_or(false, |mut slots| slots.remove(&player).is_some())
    }

    /// Unexpired reservations on `server_name`; expired ones are purged here.
    pub fn reserved_count(&self, server_name: &str) -> u32 {
        self.reserved_count_at(server_name, current_millis())
    }

    fn reserved_count_at(&self, server_name: &str, now: u64) -> u32 {
        match self.reservations.get_mut(server_name) {
            Some(mut slots) => {
                slots.retain(|_, expires_at| *expires_at >= now);
                slots.len() as u32
            }
            None => 0,
        }
    }

    pub fn server_metrics(&self, server_name: &str) -> ServerMetrics {
        let Some(server) = self.cache.server(server_name) else {
            return ServerMetrics::unknown(server_name);
        };

        let reserved = self.reserved_count(server_name);
        let available = server.is_online(current_millis(), STATE_STALE_THRESHOLD_MS);
        ServerMetrics {
            online_players: server.online_players.saturating_add(reserved),
            max_players: server.max_players,
            tps: server.tps,
            weight: 1,
            last_update: server.last_update,
            available,
            server_name: server.name,
        }
    }

    pub fn all_server_metrics(&self) -> Vec<ServerMetrics> {
        self.cache
            .servers()
            .iter()
            .map(|server| self.server_metrics(&server.name))
            .collect()
    }
}

/// First element for which no later element is strictly better
fn first_best<'a>(
    available: &'a [ServerMetrics],
    better: impl Fn(&ServerMetrics, &ServerMetrics) -> bool,
) -> &'a ServerMetrics {
    let mut best = &available[0];
    for candidate in &available[1..] {
        if better(candidate, best) {
            best = candidate;
        }
    }
    best
}

fn select_least_connections(available: &[ServerMetrics]) -> &ServerMetrics {
    first_best(available, |candidate, best| candidate.online_players < best.online_players)
}

fn select_least_tps_load(available: &[ServerMetrics]) -> &ServerMetrics {
    first_best(available, |candidate, best| candidate.tps > best.tps)
}

fn select_random(available: &[ServerMetrics]) -> &ServerMetrics {
    &available[rand::thread_rng().gen_range(0..available.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::messages::{NetworkState, ServerSummary};

    fn summary(name: &str, online: u32, max: u32, tps: f64) -> ServerSummary {
        ServerSummary {
            name: name.to_string(),
            online_players: online,
            max_players: max,
            tps,
            last_update: current_millis(),
            extra_data: HashMap::new(),
        }
    }

    fn balancer_with(servers: Vec<ServerSummary>) -> LoadBalancerService {
        let cache = Arc::new(NetworkStateCache::default());
        cache.update(NetworkState {
            server_count: servers.len() as u32,
            servers,
            ..NetworkState::default()
        });
        LoadBalancerService::new(cache)
    }

    fn fleet() -> LoadBalancerService {
        balancer_with(vec![
            summary("a", 80, 100, 19.0),
            summary("b", 10, 100, 18.0),
            summary("c", 10, 20, 20.0),
        ])
    }

    const ALL_STRATEGIES: [BalancingStrategy; 6] = [
        BalancingStrategy::RoundRobin,
        BalancingStrategy::LeastConnections,
        BalancingStrategy::LeastTpsLoad,
        BalancingStrategy::Weighted,
        BalancingStrategy::Random,
        BalancingStrategy::PriorityQueue,
    ];

    #[test]
    fn test_least_connections_breaks_ties_by_input_order() {
        let balancer = fleet();
        let player = Uuid::new_v4();
        assert_eq!(balancer.select_server(player, &["a", "b", "c"]).as_deref(), Some("b"));
        assert_eq!(balancer.select_server(player, &["a", "c", "b"]).as_deref(), Some("c"));
    }

    #[test]
    fn test_full_server_is_never_selected() {
        let balancer = balancer_with(vec![summary("full", 50, 50, 20.0), summary("open", 49, 50, 1.0)]);
        let player = Uuid::new_v4();
        for strategy in ALL_STRATEGIES {
            for _ in 0..20 {
                assert_eq!(
                    balancer.select_server_with(player, &["full", "open"], strategy).as_deref(),
                    Some("open"),
                    "strategy {:?}",
                    strategy
                );
            }
        }
    }

    #[test]
    fn test_no_capacity_returns_none() {
        let balancer = balancer_with(vec![summary("full", 10, 10, 20.0)]);
        let player = Uuid::new_v4();
        assert!(balancer.select_server(player, &["full", "unknown"]).is_none());
        assert!(balancer.select_server::<&str>(player, &[]).is_none());
    }

    #[test]
    fn test_round_robin_cycles() {
        let balancer = fleet();
        let player = Uuid::new_v4();
        let picks: Vec<String> = (0..4)
            .filter_map(|_| balancer.select_server_with(player, &["a", "b"], BalancingStrategy::RoundRobin))
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_least_tps_load_prefers_highest_tps() {
        let balancer = fleet();
        let pick = balancer.select_server_with(Uuid::new_v4(), &["a", "b", "c"], BalancingStrategy::LeastTpsLoad);
        assert_eq!(pick.as_deref(), Some("c"));
    }

    #[test]
    fn test_priority_players_get_lowest_load_factor() {
        let balancer = balancer_with(vec![summary("big", 30, 100, 20.0), summary("small", 5, 10, 20.0)]);
        let vip = Uuid::new_v4();
        let regular = Uuid::new_v4();
        balancer.set_player_priority(vip, 10);

        let candidates = ["small", "big"];
        assert_eq!(
            balancer.select_server_with(vip, &candidates, BalancingStrategy::PriorityQueue).as_deref(),
            Some("big")
        );
        assert_eq!(
            balancer.select_server_with(regular, &candidates, BalancingStrategy::PriorityQueue).as_deref(),
            Some("small")
        );

        balancer.set_player_priority(vip, 0);
        assert_eq!(balancer.player_priority(vip), 0);
    }

    #[test]
    fn test_weighted_follows_weights() {
        let balancer = fleet();
        balancer.set_weight_provider(Arc::new(|name: &str, _: &ServerMetrics| -> u32 {
            if name == "c" {
                1
            } else {
                0
            }
        }));
        for _ in 0..20 {
            let pick = balancer.select_server_with(Uuid::new_v4(), &["a", "b", "c"], BalancingStrategy::Weighted);
            assert_eq!(pick.as_deref(), Some("c"));
        }
    }

    #[test]
    fn test_weighted_zero_total_falls_back_to_random() {
        let balancer = fleet();
        balancer.set_weight_provider(Arc::new(FixedWeight(0)));
        let pick = balancer.select_server_with(Uuid::new_v4(), &["a", "b"], BalancingStrategy::Weighted);
        assert!(matches!(pick.as_deref(), Some("a") | Some("b")));
    }

    #[test]
    fn test_reservations_consume_capacity() {
        let balancer = balancer_with(vec![summary("tiny", 1, 2, 20.0)]);
        let player = Uuid::new_v4();

        balancer.reserve_slot("tiny", player, Duration::from_secs(60));
        assert_eq!(balancer.reserved_count("tiny"), 1);
        assert_eq!(balancer.server_metrics("tiny").online_players, 2);
        assert!(balancer.select_server(Uuid::new_v4(), &["tiny"]).is_none());

        assert!(balancer.release_slot("tiny", player));
        assert!(!balancer.release_slot("tiny", player));
        assert_eq!(balancer.select_server(Uuid::new_v4(), &["tiny"]).as_deref(), Some("tiny"));
    }

    #[test]
    fn test_expired_reservations_are_purged() {
        let balancer = fleet();
        balancer.reserve_slot("a", Uuid::new_v4(), Duration::from_millis(100));
        let now = current_millis();
        assert_eq!(balancer.reserved_count_at("a", now), 1);
        assert_eq!(balancer.reserved_count_at("a", now + 10_000), 0);
        assert_eq!(balancer.reserved_count("a"), 0);
    }

    #[test]
    fn test_server_metrics_views() {
        let balancer = fleet();
        let metrics = balancer.server_metrics("A");
        assert_eq!(metrics.server_name, "a");
        assert_eq!(metrics.available_slots(), 20);
        assert_approx_eq::assert_approx_eq!(metrics.load_factor(), 0.8);
        assert_approx_eq::assert_approx_eq!(metrics.tps_load_factor(), 0.05);

        let unknown = balancer.server_metrics("ghost");
        assert!(!unknown.has_space());
        assert_approx_eq::assert_approx_eq!(unknown.load_factor(), 1.0);
        assert_eq!(balancer.all_server_metrics().len(), 3);
    }

    #[test]
    fn test_weight_providers() {
        let metrics = fleet().server_metrics("b");
        assert_eq!(FixedWeight(3).weight("b", &metrics), 3);
        assert_eq!(AvailableSlotsWeight.weight("b", &metrics), 90);
        assert_eq!(TpsWeight.weight("b", &metrics), 90);
    }
}
