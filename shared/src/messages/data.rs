use super::Payload;
use crate::error::{ProtocolError, Result};
use crate::wire::*;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use uuid::Uuid;

/// Request to move a player from one node to another.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub player_id: Uuid,
    pub player_name: String,
    pub source_server: String,
    pub target_server: String,
    pub portal_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub seamless: bool,
}

impl Payload for TransferRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_uuid(buf, &self.player_id);
        put_string(buf, &self.player_name)?;
        put_string(buf, &self.source_server)?;
        put_string(buf, &self.target_server)?;
        put_string(buf, &self.portal_id)?;
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        buf.put_f64(self.z);
        put_bool(buf, self.seamless);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            player_id: get_uuid(buf)?,
            player_name: get_string(buf)?,
            source_server: get_string(buf)?,
            target_server: get_string(buf)?,
            portal_id: get_string(buf)?,
            x: get_f64(buf)?,
            y: get_f64(buf)?,
            z: get_f64(buf)?,
            seamless: get_bool(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalKind {
    Boundary,
    Region,
}

impl PortalKind {
    fn ordinal(self) -> i32 {
        match self {
            PortalKind::Boundary => 0,
            PortalKind::Region => 1,
        }
    }

    fn from_ordinal(value: i32) -> Result<Self> {
        match value {
            0 => Ok(PortalKind::Boundary),
            1 => Ok(PortalKind::Region),
            other => Err(ProtocolError::InvalidOrdinal {
                what: "portal kind",
                value: i64::from(other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRegion {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxRegion {
    pub world: String,
    pub min: (i32, i32, i32),
    pub max: (i32, i32, i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalData {
    pub id: String,
    pub target_server: String,
    pub kind: PortalKind,
    pub seamless: bool,
    pub boundary: Option<BoundaryRegion>,
    pub region: Option<BoxRegion>,
}

impl PortalData {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.id)?;
        put_string(buf, &self.target_server)?;
        buf.put_i32(self.kind.ordinal());
        put_bool(buf, self.seamless);

        put_bool(buf, self.boundary.is_some());
        if let Some(boundary) = &self.boundary {
            buf.put_i32(boundary.min_x);
            buf.put_i32(boundary.max_x);
            buf.put_i32(boundary.min_z);
            buf.put_i32(boundary.max_z);
        }

        put_bool(buf, self.region.is_some());
        if let Some(region) = &self.region {
            put_string(buf, &region.world)?;
            for value in [region.min.0, region.min.1, region.min.2, region.max.0, region.max.1, region.max.2] {
                buf.put_i32(value);
            }
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let id = get_string(buf)?;
        let target_server = get_string(buf)?;
        let kind = PortalKind::from_ordinal(get_i32(buf)?)?;
        let seamless = get_bool(buf)?;

        let boundary = if get_bool(buf)? {
            Some(BoundaryRegion {
                min_x: get_i32(buf)?,
                max_x: get_i32(buf)?,
                min_z: get_i32(buf)?,
                max_z: get_i32(buf)?,
            })
        } else {
            None
        };

        let region = if get_bool(buf)? {
            let world = get_string(buf)?;
            let min = (get_i32(buf)?, get_i32(buf)?, get_i32(buf)?);
            let max = (get_i32(buf)?, get_i32(buf)?, get_i32(buf)?);
            Some(BoxRegion { world, min, max })
        } else {
            None
        };

        Ok(Self {
            id,
            target_server,
            kind,
            seamless,
            boundary,
            region,
        })
    }
}

/// Full portal list of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSync {
    pub node_name: String,
    pub portals: Vec<PortalData>,
}

impl Payload for PortalSync {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.node_name)?;
        buf.put_i32(self.portals.len() as i32);
        for portal in &self.portals {
            portal.encode(buf)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let node_name = get_string(buf)?;
        let count = get_count(buf, "portal list")?;
        let mut portals = Vec::with_capacity(count);
        for _ in 0..count {
            portals.push(PortalData::decode(buf)?);
        }
        Ok(Self { node_name, portals })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPlayer {
    pub id: Uuid,
    pub name: String,
}

/// Cross-server event published by one node.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBroadcast {
    pub event_type: String,
    pub source_server: String,
    pub player: Option<EventPlayer>,
    pub player_groups: Vec<String>,
    pub data: HashMap<String, String>,
    pub timestamp: u64,
}

impl EventBroadcast {
    pub fn has_group(&self, group: &str) -> bool {
        self.player_groups.iter().any(|g| g == group)
    }

    /// True when no groups are required or the player is in any of them.
    pub fn matches_groups(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|g| self.has_group(g))
    }
}

impl Payload for EventBroadcast {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.event_type)?;
        put_string(buf, &self.source_server)?;
        put_bool(buf, self.player.is_some());
        if let Some(player) = &self.player {
            put_uuid(buf, &player.id);
            put_string(buf, &player.name)?;
        }
        buf.put_i32(self.player_groups.len() as i32);
        for group in &self.player_groups {
            put_string(buf, group)?;
        }
        put_property_map(buf, &self.data)?;
        buf.put_u64(self.timestamp);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let event_type = get_string(buf)?;
        let source_server = get_string(buf)?;
        let player = if get_bool(buf)? {
            Some(EventPlayer {
                id: get_uuid(buf)?,
                name: get_string(buf)?,
            })
        } else {
            None
        };
        let group_count = get_count(buf, "player groups")?;
        let mut player_groups = Vec::with_capacity(group_count);
        for _ in 0..group_count {
            player_groups.push(get_string(buf)?);
        }
        Ok(Self {
            event_type,
            source_server,
            player,
            player_groups,
            data: get_property_map(buf)?,
            timestamp: get_u64(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    FullSync,
    PartialUpdate,
    Delete,
    Request,
}

impl SyncOperation {
    fn ordinal(self) -> i32 {
        match self {
            SyncOperation::FullSync => 0,
            SyncOperation::PartialUpdate => 1,
            SyncOperation::Delete => 2,
            SyncOperation::Request => 3,
        }
    }

    fn from_ordinal(value: i32) -> Result<Self> {
        match value {
            0 => Ok(SyncOperation::FullSync),
            1 => Ok(SyncOperation::PartialUpdate),
            2 => Ok(SyncOperation::Delete),
            3 => Ok(SyncOperation::Request),
            other => Err(ProtocolError::InvalidOrdinal {
                what: "sync operation",
                value: i64::from(other),
            }),
        }
    }
}

/// One replication operation on a player's key/value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvSync {
    pub player_id: Uuid,
    pub origin: String,
    pub operation: SyncOperation,
    pub version: u64,
    pub data: HashMap<String, Vec<u8>>,
}

impl Payload for KvSync {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_uuid(buf, &self.player_id);
        put_string(buf, &self.origin)?;
        buf.put_i32(self.operation.ordinal());
        buf.put_u64(self.version);
        buf.put_i32(self.data.len() as i32);
        for (key, value) in &self.data {
            put_string(buf, key)?;
            put_byte_array(buf, value);
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let player_id = get_uuid(buf)?;
        let origin = get_string(buf)?;
        let operation = SyncOperation::from_ordinal(get_i32(buf)?)?;
        let version = get_u64(buf)?;
        let count = get_count(buf, "kv entries")?;
        let mut data = HashMap::with_capacity(count);
        for _ in 0..count {
            let key = get_string(buf)?;
            let value = get_byte_array(buf, "kv value")?;
            data.insert(key, value);
        }
        Ok(Self {
            player_id,
            origin,
            operation,
            version,
            data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    Request,
    Response,
    Push,
}

impl ChunkAction {
    fn ordinal(self) -> u32 {
        match self {
            ChunkAction::Request => 0,
            ChunkAction::Response => 1,
            ChunkAction::Push => 2,
        }
    }

    fn from_ordinal(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ChunkAction::Request),
            1 => Ok(ChunkAction::Response),
            2 => Ok(ChunkAction::Push),
            other => Err(ProtocolError::InvalidOrdinal {
                what: "chunk action",
                value: i64::from(other),
            }),
        }
    }
}

/// Opaque chunk payload exchanged between two nodes via the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub request_id: Option<Uuid>,
    pub source_server: String,
    pub target_server: String,
    pub action: ChunkAction,
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

impl Payload for ChunkData {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_bool(buf, self.request_id.is_some());
        if let Some(id) = &self.request_id {
            put_uuid(buf, id);
        }
        put_string(buf, &self.source_server)?;
        put_string(buf, &self.target_server)?;
        put_var_int(buf, self.action.ordinal());
        buf.put_i32(self.chunk_x);
        buf.put_i32(self.chunk_z);
        buf.put_u64(self.timestamp);
        put_byte_array(buf, &self.payload);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let request_id = if get_bool(buf)? { Some(get_uuid(buf)?) } else { None };
        Ok(Self {
            request_id,
            source_server: get_string(buf)?,
            target_server: get_string(buf)?,
            action: ChunkAction::from_ordinal(get_var_int(buf)?)?,
            chunk_x: get_i32(buf)?,
            chunk_z: get_i32(buf)?,
            timestamp: get_u64(buf)?,
            payload: get_byte_array(buf, "chunk payload")?,
        })
    }
}
