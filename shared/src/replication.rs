//! Per-player key/value records replicated with record-level versions
//!
//! Every record carries one version stamp for all its keys. Incoming
//! `FULL_SYNC` and `PARTIAL_UPDATE` operations are merged key by key through a
//! [`ConflictResolver`], after which the record version becomes the larger of
//! the local and remote versions. Two concurrent writes to different keys of
//! the same record are therefore ordered by the record version, not per key.

use crate::messages::{KvSync, SyncOperation};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Chooses the value kept when a local and a remote value exist for one key.
///
/// Resolvers run while the record is locked and must not call back into the store.
pub trait ConflictResolver: Send + Sync {
    fn resolve(
        &self,
        key: &str,
        local: &[u8],
        remote: &[u8],
        local_version: u64,
        remote_version: u64,
    ) -> Vec<u8>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&str, &[u8], &[u8], u64, u64) -> Vec<u8> + Send + Sync,
{
    fn resolve(&self, key: &str, local: &[u8], remote: &[u8], local_version: u64, remote_version: u64) -> Vec<u8> {
        self(key, local, remote, local_version, remote_version)
    }
}

/// Remote value wins only when its version is strictly greater.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, _key: &str, local: &[u8], remote: &[u8], local_version: u64, remote_version: u64) -> Vec<u8> {
        if remote_version > local_version {
            remote.to_vec()
        } else {
            local.to_vec()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl ConflictResolver for LocalWins {
    fn resolve(&self, _key: &str, local: &[u8], _remote: &[u8], _lv: u64, _rv: u64) -> Vec<u8> {
        local.to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictResolver for RemoteWins {
    fn resolve(&self, _key: &str, _local: &[u8], remote: &[u8], _lv: u64, _rv: u64) -> Vec<u8> {
        remote.to_vec()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    values: HashMap<String, Vec<u8>>,
    version: u64,
}

impl PlayerRecord {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> &HashMap<String, Vec<u8>> {
        &self.values
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    // Local mutations never move the version backwards
    fn touch(&mut self, now: u64) -> u64 {
        self.version = self.version.max(now);
        self.version
    }
}

pub struct ReplicatedStore {
    records: DashMap<Uuid, PlayerRecord>,
    resolver: RwLock<Arc<dyn ConflictResolver>>,
}

impl ReplicatedStore {
    pub fn new(resolver: Arc<dyn ConflictResolver>) -> Self {
        Self {
            records: DashMap::new(),
            resolver: RwLock::new(resolver),
        }
    }

    pub fn set_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        *self.resolver.write() = resolver;
    }

    /// Stores a local value and returns the record version to propagate.
    pub fn set(&self, player: Uuid, key: &str, value: Vec<u8>, now: u64) -> u64 {
        let mut record = self.records.entry(player).or_default();
        record.values.insert(key.to_string(), value);
        record.touch(now)
    }

    /// Removes a local value, returning the new record version if the key existed.
    pub fn remove(&self, player: Uuid, key: &str, now: u64) -> Option<u64> {
        let mut record = self.records.get_mut(&player)?;
        record.values.remove(key)?;
        Some(record.touch(now))
    }

    pub fn get(&self, player: Uuid, key: &str) -> Option<Vec<u8>> {
        self.records
            .get(&player)
            .and_then(|record| record.values.get(key).cloned())
    }

    pub fn record(&self, player: Uuid) -> Option<PlayerRecord> {
        self.records.get(&player).map(|record| record.clone())
    }

    pub fn version(&self, player: Uuid) -> Option<u64> {
        self.records.get(&player).map(|record| record.version)
    }

    pub fn contains_player(&self, player: Uuid) -> bool {
        self.records.contains_key(&player)
    }

    /// Drops the local copy of a record; the next sync rebuilds it.
    pub fn invalidate(&self, player: Uuid) -> bool {
        self.records.remove(&player).is_some()
    }

    pub fn player_count(&self) -> usize {
        self.records.len()
    }

    /// Applies a replication operation received from a peer.
    ///
    /// Returns false for operations that carry no data to merge (`REQUEST`,
    /// or `DELETE` for an unknown player).
    pub fn apply(&self, sync: &KvSync) -> bool {
        match sync.operation {
            SyncOperation::Request => false,
            SyncOperation::Delete => match self.records.get_mut(&sync.player_id) {
                Some(mut record) => {
                    for key in sync.data.keys() {
                        record.values.remove(key);
                    }
                    true
                }
                None => false,
            },
            SyncOperation::FullSync | SyncOperation::PartialUpdate => {
                let resolver = Arc::clone(&self.resolver.read());
                let mut record = self.records.entry(sync.player_id).or_default();
                let local_version = record.version;
                let always_resolve = sync.operation == SyncOperation::FullSync;

                for (key, remote) in &sync.data {
                    let merged = match record.values.get(key) {
                        Some(local) if always_resolve || sync.version <= local_version => {
                            resolver.resolve(key, local, remote, local_version, sync.version)
                        }
                        _ => remote.clone(),
                    };
                    record.values.insert(key.clone(), merged);
                }
                record.version = local_version.max(sync.version);
                true
            }
        }
    }
}

impl Default for ReplicatedStore {
    fn default() -> Self {
        Self::new(Arc::new(LastWriteWins))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Uuid {
        Uuid::from_u128(42)
    }

    fn sync(operation: SyncOperation, version: u64, entries: &[(&str, &str)]) -> KvSync {
        KvSync {
            player_id: player(),
            origin: "remote".to_string(),
            operation,
            version,
            data: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    #[test]
    fn test_last_write_wins_compares_versions() {
        assert_eq!(LastWriteWins.resolve("k", b"local", b"remote", 10, 5), b"local");
        assert_eq!(LastWriteWins.resolve("k", b"local", b"remote", 5, 10), b"remote");
        assert_eq!(LastWriteWins.resolve("k", b"local", b"remote", 7, 7), b"local");
    }

    #[test]
    fn test_local_and_remote_wins_ignore_versions() {
        for (lv, rv) in [(10, 5), (5, 10)] {
            assert_eq!(LocalWins.resolve("k", b"l", b"r", lv, rv), b"l");
            assert_eq!(RemoteWins.resolve("k", b"l", b"r", lv, rv), b"r");
        }
    }

    #[test]
    fn test_closure_resolver() {
        let concat = |_: &str, l: &[u8], r: &[u8], _: u64, _: u64| [l, r].concat();
        let store = ReplicatedStore::new(Arc::new(concat));
        store.set(player(), "k", b"a".to_vec(), 10);
        store.apply(&sync(SyncOperation::FullSync, 5, &[("k", "b")]));
        assert_eq!(store.get(player(), "k").unwrap(), b"ab");
    }

    #[test]
    fn test_set_versions_never_decrease() {
        let store = ReplicatedStore::default();
        assert_eq!(store.set(player(), "a", vec![1], 100), 100);
        assert_eq!(store.set(player(), "b", vec![2], 50), 100);
        assert_eq!(store.set(player(), "c", vec![3], 150), 150);
    }

    #[test]
    fn test_full_sync_older_remote_keeps_local_value() {
        let store = ReplicatedStore::default();
        store.set(player(), "coins", b"10".to_vec(), 10);
        store.apply(&sync(SyncOperation::FullSync, 5, &[("coins", "99"), ("rank", "vip")]));

        assert_eq!(store.get(player(), "coins").unwrap(), b"10");
        assert_eq!(store.get(player(), "rank").unwrap(), b"vip");
        assert_eq!(store.version(player()), Some(10));
    }

    #[test]
    fn test_partial_update_newer_remote_is_taken() {
        let store = ReplicatedStore::new(Arc::new(LocalWins));
        store.set(player(), "coins", b"10".to_vec(), 5);
        store.apply(&sync(SyncOperation::PartialUpdate, 10, &[("coins", "20")]));

        // Strictly newer partial updates skip the resolver entirely
        assert_eq!(store.get(player(), "coins").unwrap(), b"20");
        assert_eq!(store.version(player()), Some(10));
    }

    #[test]
    fn test_partial_update_older_remote_goes_through_resolver() {
        let store = ReplicatedStore::new(Arc::new(RemoteWins));
        store.set(player(), "coins", b"10".to_vec(), 10);
        store.apply(&sync(SyncOperation::PartialUpdate, 5, &[("coins", "20")]));
        assert_eq!(store.get(player(), "coins").unwrap(), b"20");
        assert_eq!(store.version(player()), Some(10));
    }

    #[test]
    fn test_record_granularity_versioning() {
        // Local wrote "a" at 10; remote wrote "b" at 8 and also carries a stale "a"
        let store = ReplicatedStore::default();
        store.set(player(), "a", b"local-a".to_vec(), 10);
        store.apply(&sync(SyncOperation::FullSync, 8, &[("a", "old-a"), ("b", "remote-b")]));
        assert_eq!(store.get(player(), "a").unwrap(), b"local-a");
        assert_eq!(store.get(player(), "b").unwrap(), b"remote-b");
    }

    #[test]
    fn test_first_sync_adopts_remote_version() {
        let store = ReplicatedStore::default();
        store.apply(&sync(SyncOperation::FullSync, 77, &[("k", "v")]));
        assert_eq!(store.version(player()), Some(77));
    }

    #[test]
    fn test_delete_removes_keys() {
        let store = ReplicatedStore::default();
        store.set(player(), "a", vec![1], 1);
        store.set(player(), "b", vec![2], 1);
        assert!(store.apply(&sync(SyncOperation::Delete, 2, &[("a", "")])));
        assert!(store.get(player(), "a").is_none());
        assert!(store.get(player(), "b").is_some());
    }

    #[test]
    fn test_request_and_unknown_delete_change_nothing() {
        let store = ReplicatedStore::default();
        assert!(!store.apply(&sync(SyncOperation::Request, 0, &[])));
        assert!(!store.apply(&sync(SyncOperation::Delete, 0, &[("a", "")])));
        assert_eq!(store.player_count(), 0);
    }

    #[test]
    fn test_remove_and_invalidate() {
        let store = ReplicatedStore::default();
        store.set(player(), "a", vec![1], 5);
        assert_eq!(store.remove(player(), "a", 9), Some(9));
        assert_eq!(store.remove(player(), "a", 9), None);
        assert!(store.invalidate(player()));
        assert!(store.record(player()).is_none());
    }
}
