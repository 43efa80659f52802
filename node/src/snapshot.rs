//! Periodic metrics capture for outgoing snapshots and metrics reports

use parking_lot::Mutex;
use shared::messages::{DataPoint, MetricsReport, NodeSnapshot};
use shared::utils::current_millis;
use shared::METRICS_HISTORY_CAPACITY;
use std::collections::{HashMap, VecDeque};

type Supplier<T> = Box<dyn Fn() -> T + Send + Sync>;

#[derive(Debug, Default)]
struct History {
    tps: VecDeque<DataPoint>,
    players: VecDeque<DataPoint>,
}

impl History {
    fn push(&mut self, timestamp: u64, tps: f64, players: u32) {
        push_bounded(&mut self.tps, DataPoint { timestamp, value: tps });
        push_bounded(
            &mut self.players,
            DataPoint {
                timestamp,
                value: f64::from(players),
            },
        );
    }
}

fn push_bounded(buffer: &mut VecDeque<DataPoint>, point: DataPoint) {
    if buffer.len() == METRICS_HISTORY_CAPACITY {
        buffer.pop_front();
    }
    buffer.push_back(point);
}

/// Polls the game server for its load figures.
///
/// The three suppliers are invoked once per capture. Extra data set through
/// [`set_extra_data`](Self::set_extra_data) is embedded verbatim in every
/// snapshot. Each capture also appends a point to the TPS and player history
/// (bounded ring buffers) reported in [`MetricsReport`]s.
pub struct SnapshotCollector {
    online_players: Supplier<u32>,
    max_players: Supplier<u32>,
    tps: Supplier<f64>,
    extra_data: Mutex<HashMap<String, String>>,
    history: Mutex<History>,
    counters: Mutex<HashMap<String, u64>>,
}

impl SnapshotCollector {
    pub fn new<O, M, T>(online_players: O, max_players: M, tps: T) -> Self
    where
        O: Fn() -> u32 + Send + Sync + 'static,
        M: Fn() -> u32 + Send + Sync + 'static,
        T: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            online_players: Box::new(online_players),
            max_players: Box::new(max_players),
            tps: Box::new(tps),
            extra_data: Mutex::new(HashMap::new()),
            history: Mutex::new(History::default()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_extra_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.extra_data.lock().insert(key.into(), value.into());
    }

    pub fn remove_extra_data(&self, key: &str) -> Option<String> {
        self.extra_data.lock().remove(key)
    }

    pub fn extra_data(&self) -> HashMap<String, String> {
        self.extra_data.lock().clone()
    }

    pub fn capture(&self) -> NodeSnapshot {
        let online_players = (self.online_players)();
        let max_players = (self.max_players)();
        let tps = (self.tps)();
        let now = current_millis();

        self.history.lock().push(now, tps, online_players);

        NodeSnapshot {
            online_players,
            max_players,
            tps,
            capture_timestamp: now,
            extra_data: self.extra_data(),
        }
    }

    pub fn increment_counter(&self, name: &str, by: u64) {
        let mut counters = self.counters.lock();
        match counters.get_mut(name) {
            Some(value) => *value = value.saturating_add(by),
            None => {
                counters.insert(name.to_string(), by);
            }
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn metrics_report(&self) -> MetricsReport {
        let history = self.history.lock();
        MetricsReport {
            tps_history: history.tps.iter().cloned().collect(),
            player_history: history.players.iter().cloned().collect(),
            counters: self.counters.lock().clone(),
        }
    }
}

impl std::fmt::Debug for SnapshotCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCollector")
            .field("extra_data", &*self.extra_data.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed_collector() -> SnapshotCollector {
        SnapshotCollector::new(|| 12, || 100, || 19.5)
    }

    #[test]
    fn test_capture_polls_suppliers() {
        let online = Arc::new(AtomicU32::new(3));
        let source = Arc::clone(&online);
        let collector = SnapshotCollector::new(move || source.load(Ordering::SeqCst), || 50, || 20.0);

        assert_eq!(collector.capture().online_players, 3);
        online.store(7, Ordering::SeqCst);
        let snapshot = collector.capture();
        assert_eq!(snapshot.online_players, 7);
        assert_eq!(snapshot.max_players, 50);
        assert!(snapshot.capture_timestamp > 0);
    }

    #[test]
    fn test_extra_data_is_embedded() {
        let collector = fixed_collector();
        collector.set_extra_data("game_type", "skywars");
        collector.set_extra_data("bedrock_port", "19132");
        let snapshot = collector.capture();
        assert_eq!(snapshot.extra_data.get("game_type").map(String::as_str), Some("skywars"));
        assert_eq!(collector.remove_extra_data("bedrock_port").as_deref(), Some("19132"));
        assert_eq!(collector.extra_data().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let collector = fixed_collector();
        for _ in 0..(METRICS_HISTORY_CAPACITY + 25) {
            collector.capture();
        }
        let report = collector.metrics_report();
        assert_eq!(report.tps_history.len(), METRICS_HISTORY_CAPACITY);
        assert_eq!(report.player_history.len(), METRICS_HISTORY_CAPACITY);
        assert_approx_eq::assert_approx_eq!(report.tps_history[0].value, 19.5);
        assert_approx_eq::assert_approx_eq!(report.player_history[0].value, 12.0);
    }

    #[test]
    fn test_counters() {
        let collector = fixed_collector();
        collector.increment_counter("snapshots_sent", 1);
        collector.increment_counter("snapshots_sent", 2);
        assert_eq!(collector.counter("snapshots_sent"), 3);
        assert_eq!(collector.counter("missing"), 0);
        assert_eq!(collector.metrics_report().counters.get("snapshots_sent"), Some(&3));
    }
}
