//! Master-side replica of player key/value records

use crate::router::EventRouter;
use log::debug;
use shared::messages::{KvSync, SyncOperation};
use shared::replication::ReplicatedStore;
use shared::Packet;
use std::sync::Arc;

/// Keeps the authoritative copy of every player record
///
/// Mutations from one node are merged into the replica and relayed to all
/// other nodes. `REQUEST` operations are answered from the replica.
pub struct KvAuthority {
    store: ReplicatedStore,
    router: Arc<EventRouter>,
    origin: String,
}

impl KvAuthority {
    pub fn new(router: Arc<EventRouter>, origin: impl Into<String>) -> Self {
        Self {
            store: ReplicatedStore::default(),
            router,
            origin: origin.into(),
        }
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }

    /// Handles a sync from `source`, returning the reply for that node if any
    pub fn handle(&self, source: &str, sync: KvSync) -> Option<Packet> {
        match sync.operation {
            SyncOperation::Request => {
                let record = self.store.record(sync.player_id).unwrap_or_default();
                debug!("Answering kv request for {} from {}", sync.player_id, source);
                Some(Packet::KvSync(KvSync {
                    player_id: sync.player_id,
                    origin: self.origin.clone(),
                    operation: SyncOperation::FullSync,
                    version: record.version(),
                    data: record.values().clone(),
                }))
            }
            SyncOperation::FullSync | SyncOperation::PartialUpdate | SyncOperation::Delete => {
                self.store.apply(&sync);
                self.router.broadcast_except(Packet::KvSync(sync), source);
                None
            }
        }
    }
}
