//! Node-side replicated player key/value store

use crate::error::NodeError;
use crate::outbound::Outbound;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::messages::{KvSync, SyncOperation};
use shared::replication::{ConflictResolver, ReplicatedStore};
use shared::utils::current_millis;
use shared::Packet;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-player key/value data kept in sync across the fleet.
///
/// Every local mutation is applied immediately and pushed to the master as a
/// `PARTIAL_UPDATE` or `DELETE`. Nothing is acknowledged or retried; a lost
/// update is repaired by the next [`sync`](Self::sync) or [`load`](Self::load).
pub struct DistributedKv {
    store: ReplicatedStore,
    outbound: Outbound,
    origin: String,
}

impl DistributedKv {
    pub fn new(outbound: Outbound, origin: impl Into<String>) -> Self {
        Self {
            store: ReplicatedStore::default(),
            outbound,
            origin: origin.into(),
        }
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }

    fn push(&self, player: Uuid, operation: SyncOperation, version: u64, data: HashMap<String, Vec<u8>>) -> bool {
        self.outbound.send(Packet::KvSync(KvSync {
            player_id: player,
            origin: self.origin.clone(),
            operation,
            version,
            data,
        }))
    }

    /// Stores raw bytes; returns whether the update reached the send queue.
    pub fn set_bytes(&self, player: Uuid, key: &str, value: Vec<u8>) -> bool {
        let version = self.store.set(player, key, value.clone(), current_millis());
        let mut data = HashMap::new();
        data.insert(key.to_string(), value);
        self.push(player, SyncOperation::PartialUpdate, version, data)
    }

    pub fn set_value<T: Serialize>(&self, player: Uuid, key: &str, value: &T) -> Result<bool, NodeError> {
        let bytes = bincode::serialize(value)?;
        Ok(self.set_bytes(player, key, bytes))
    }

    /// Empty values read as absent.
    pub fn get_bytes(&self, player: Uuid, key: &str) -> Option<Vec<u8>> {
        self.store.get(player, key).filter(|value| !value.is_empty())
    }

    pub fn get_value<T: DeserializeOwned>(&self, player: Uuid, key: &str) -> Result<Option<T>, NodeError> {
        match self.get_bytes(player, key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_value_or<T: DeserializeOwned>(&self, player: Uuid, key: &str, default: T) -> Result<T, NodeError> {
        Ok(self.get_value(player, key)?.unwrap_or(default))
    }

    pub fn contains(&self, player: Uuid, key: &str) -> bool {
        self.store.record(player).map_or(false, |record| record.contains(key))
    }

    pub fn keys(&self, player: Uuid) -> Vec<String> {
        self.store
            .record(player)
            .map(|record| record.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn get_all(&self, player: Uuid) -> HashMap<String, Vec<u8>> {
        self.store
            .record(player)
            .map(|record| record.values().clone())
            .unwrap_or_default()
    }

    /// Removes a key locally and propagates the deletion.
    pub fn remove(&self, player: Uuid, key: &str) -> bool {
        let now = current_millis();
        let version = self.store.remove(player, key, now).unwrap_or(now);
        let mut data = HashMap::new();
        data.insert(key.to_string(), Vec::new());
        self.push(player, SyncOperation::Delete, version, data)
    }

    /// Pushes the whole local record as a `FULL_SYNC`; false if there is none.
    pub fn sync(&self, player: Uuid) -> bool {
        match self.store.record(player) {
            Some(record) => self.push(
                player,
                SyncOperation::FullSync,
                record.version(),
                record.values().clone(),
            ),
            None => false,
        }
    }

    /// Asks the master for its copy of the record.
    pub fn load(&self, player: Uuid) -> bool {
        self.push(player, SyncOperation::Request, current_millis(), HashMap::new())
    }

    pub fn invalidate(&self, player: Uuid) -> bool {
        self.store.invalidate(player)
    }

    pub fn set_conflict_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        self.store.set_resolver(resolver);
    }

    /// Merges a sync received from the master.
    pub fn handle_incoming(&self, sync: &KvSync) -> bool {
        if sync.operation == SyncOperation::Request {
            debug!("Ignoring kv request for {} from {}", sync.player_id, sync.origin);
            return false;
        }
        self.store.apply(sync)
    }
}
