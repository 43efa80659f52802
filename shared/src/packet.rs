//! The closed set of messages exchanged between master and nodes
//!
//! Every variant carries a stable wire identifier and a priority class.
//! Identifiers are append-only: new messages get new ids, existing ids are
//! never reused or renumbered.

use crate::error::Result;
use crate::messages::*;
use bytes::{Bytes, BytesMut};

pub mod ids {
    pub const HANDSHAKE: u32 = 0x01;
    pub const HANDSHAKE_RESULT: u32 = 0x02;
    pub const HEARTBEAT: u32 = 0x03;
    pub const HEARTBEAT_ACK: u32 = 0x04;
    pub const NODE_SNAPSHOT: u32 = 0x10;
    pub const NETWORK_STATE: u32 = 0x11;
    pub const METRICS_REPORT: u32 = 0x12;
    pub const CIRCUIT_BREAKER_TRIPPED: u32 = 0x20;
    pub const PROTOCOL_ERROR: u32 = 0x21;
    pub const TRANSFER_REQUEST: u32 = 0x30;
    pub const PORTAL_SYNC: u32 = 0x31;
    pub const EVENT_BROADCAST: u32 = 0x40;
    pub const KV_SYNC: u32 = 0x50;
    pub const CHUNK_DATA: u32 = 0x60;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    Critical,
}

impl Priority {
    pub fn level(self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // Node -> master
    Handshake(Handshake),
    Heartbeat(Heartbeat),
    NodeSnapshot(NodeSnapshot),
    MetricsReport(MetricsReport),

    // Master -> node
    HandshakeResult(HandshakeResult),
    HeartbeatAck(HeartbeatAck),
    NetworkState(NetworkState),
    CircuitBreakerTripped(CircuitBreakerTripped),

    // Either direction
    ProtocolError(ProtocolErrorReport),
    TransferRequest(TransferRequest),
    PortalSync(PortalSync),
    EventBroadcast(EventBroadcast),
    KvSync(KvSync),
    ChunkData(ChunkData),
}

impl Packet {
    pub fn id(&self) -> u32 {
        match self {
            Packet::Handshake(_) => ids::HANDSHAKE,
            Packet::HandshakeResult(_) => ids::HANDSHAKE_RESULT,
            Packet::Heartbeat(_) => ids::HEARTBEAT,
            Packet::HeartbeatAck(_) => ids::HEARTBEAT_ACK,
            Packet::NodeSnapshot(_) => ids::NODE_SNAPSHOT,
            Packet::NetworkState(_) => ids::NETWORK_STATE,
            Packet::MetricsReport(_) => ids::METRICS_REPORT,
            Packet::CircuitBreakerTripped(_) => ids::CIRCUIT_BREAKER_TRIPPED,
            Packet::ProtocolError(_) => ids::PROTOCOL_ERROR,
            Packet::TransferRequest(_) => ids::TRANSFER_REQUEST,
            Packet::PortalSync(_) => ids::PORTAL_SYNC,
            Packet::EventBroadcast(_) => ids::EVENT_BROADCAST,
            Packet::KvSync(_) => ids::KV_SYNC,
            Packet::ChunkData(_) => ids::CHUNK_DATA,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Packet::Handshake(_)
            | Packet::HandshakeResult(_)
            | Packet::Heartbeat(_)
            | Packet::HeartbeatAck(_)
            | Packet::CircuitBreakerTripped(_)
            | Packet::ProtocolError(_)
            | Packet::TransferRequest(_) => Priority::Critical,
            Packet::NodeSnapshot(_)
            | Packet::NetworkState(_)
            | Packet::PortalSync(_)
            | Packet::EventBroadcast(_)
            | Packet::KvSync(_) => Priority::Normal,
            Packet::MetricsReport(_) | Packet::ChunkData(_) => Priority::Low,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Handshake(_) => "Handshake",
            Packet::HandshakeResult(_) => "HandshakeResult",
            Packet::Heartbeat(_) => "Heartbeat",
            Packet::HeartbeatAck(_) => "HeartbeatAck",
            Packet::NodeSnapshot(_) => "NodeSnapshot",
            Packet::NetworkState(_) => "NetworkState",
            Packet::MetricsReport(_) => "MetricsReport",
            Packet::CircuitBreakerTripped(_) => "CircuitBreakerTripped",
            Packet::ProtocolError(_) => "ProtocolError",
            Packet::TransferRequest(_) => "TransferRequest",
            Packet::PortalSync(_) => "PortalSync",
            Packet::EventBroadcast(_) => "EventBroadcast",
            Packet::KvSync(_) => "KvSync",
            Packet::ChunkData(_) => "ChunkData",
        }
    }

    pub fn encode_payload(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Packet::Handshake(p) => p.encode(buf),
            Packet::HandshakeResult(p) => p.encode(buf),
            Packet::Heartbeat(p) => p.encode(buf),
            Packet::HeartbeatAck(p) => p.encode(buf),
            Packet::NodeSnapshot(p) => p.encode(buf),
            Packet::NetworkState(p) => p.encode(buf),
            Packet::MetricsReport(p) => p.encode(buf),
            Packet::CircuitBreakerTripped(p) => p.encode(buf),
            Packet::ProtocolError(p) => p.encode(buf),
            Packet::TransferRequest(p) => p.encode(buf),
            Packet::PortalSync(p) => p.encode(buf),
            Packet::EventBroadcast(p) => p.encode(buf),
            Packet::KvSync(p) => p.encode(buf),
            Packet::ChunkData(p) => p.encode(buf),
        }
    }

    /// Decodes a payload for the given id. Returns `Ok(None)` for ids this
    /// build does not know about.
    pub fn decode_payload(id: u32, mut payload: Bytes) -> Result<Option<Packet>> {
        let buf = &mut payload;
        let packet = match id {
            ids::HANDSHAKE => Packet::Handshake(Handshake::decode(buf)?),
            ids::HANDSHAKE_RESULT => Packet::HandshakeResult(HandshakeResult::decode(buf)?),
            ids::HEARTBEAT => Packet::Heartbeat(Heartbeat::decode(buf)?),
            ids::HEARTBEAT_ACK => Packet::HeartbeatAck(HeartbeatAck::decode(buf)?),
            ids::NODE_SNAPSHOT => Packet::NodeSnapshot(NodeSnapshot::decode(buf)?),
            ids::NETWORK_STATE => Packet::NetworkState(NetworkState::decode(buf)?),
            ids::METRICS_REPORT => Packet::MetricsReport(MetricsReport::decode(buf)?),
            ids::CIRCUIT_BREAKER_TRIPPED => {
                Packet::CircuitBreakerTripped(CircuitBreakerTripped::decode(buf)?)
            }
            ids::PROTOCOL_ERROR => Packet::ProtocolError(ProtocolErrorReport::decode(buf)?),
            ids::TRANSFER_REQUEST => Packet::TransferRequest(TransferRequest::decode(buf)?),
            ids::PORTAL_SYNC => Packet::PortalSync(PortalSync::decode(buf)?),
            ids::EVENT_BROADCAST => Packet::EventBroadcast(EventBroadcast::decode(buf)?),
            ids::KV_SYNC => Packet::KvSync(KvSync::decode(buf)?),
            ids::CHUNK_DATA => Packet::ChunkData(ChunkData::decode(buf)?),
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn round_trip(packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        packet.encode_payload(&mut buf).unwrap();
        Packet::decode_payload(packet.id(), buf.freeze())
            .unwrap()
            .expect("known id")
    }

    fn sample_packets() -> Vec<Packet> {
        let player = Uuid::new_v4();
        let mut extra = HashMap::new();
        extra.insert("game_type".to_string(), "skywars".to_string());
        let mut kv = HashMap::new();
        kv.insert("coins".to_string(), vec![0, 0, 0, 42]);
        kv.insert("empty".to_string(), Vec::new());
        let mut counters = HashMap::new();
        counters.insert("packets_sent".to_string(), 1234u64);

        vec![
            Packet::Handshake(Handshake {
                protocol_version: 1,
                node_name: "lobby-1".to_string(),
                secret_key: "s3cret".to_string(),
                timestamp: 1_700_000_000_000,
            }),
            Packet::HandshakeResult(HandshakeResult::rejected("Invalid secret key")),
            Packet::Heartbeat(Heartbeat {
                timestamp: 99,
                sequence: 7,
            }),
            Packet::HeartbeatAck(HeartbeatAck {
                original_timestamp: 99,
                sequence: 7,
                processing_delay_micros: 15,
            }),
            Packet::NodeSnapshot(NodeSnapshot {
                online_players: 80,
                max_players: 100,
                tps: 19.5,
                capture_timestamp: 5,
                extra_data: extra.clone(),
            }),
            Packet::NetworkState(NetworkState {
                global_online: 90,
                server_count: 2,
                state_version: 17,
                ttl_seconds: 1,
                global_properties: HashMap::new(),
                routing_hints: extra.clone(),
                servers: vec![ServerSummary {
                    name: "a".to_string(),
                    online_players: 80,
                    max_players: 100,
                    tps: 20.0,
                    last_update: 3,
                    extra_data: extra,
                }],
            }),
            Packet::NetworkState(NetworkState::default()),
            Packet::MetricsReport(MetricsReport {
                tps_history: vec![DataPoint {
                    timestamp: 1,
                    value: 20.0,
                }],
                player_history: Vec::new(),
                counters,
            }),
            Packet::CircuitBreakerTripped(CircuitBreakerTripped {
                drop_priority_threshold: 1,
                duration_ms: 30_000,
                reason: "queue depth".to_string(),
            }),
            Packet::ProtocolError(ProtocolErrorReport::unknown_packet(0x99)),
            Packet::TransferRequest(TransferRequest {
                player_id: player,
                player_name: "Steve".to_string(),
                source_server: "a".to_string(),
                target_server: "b".to_string(),
                portal_id: "p1".to_string(),
                x: 1.5,
                y: 64.0,
                z: -3.25,
                seamless: true,
            }),
            Packet::PortalSync(PortalSync {
                node_name: "a".to_string(),
                portals: Vec::new(),
            }),
            Packet::EventBroadcast(EventBroadcast {
                event_type: "player_join".to_string(),
                source_server: "a".to_string(),
                player: Some(EventPlayer {
                    id: player,
                    name: "Steve".to_string(),
                }),
                player_groups: vec!["vip".to_string()],
                data: HashMap::new(),
                timestamp: 10,
            }),
            Packet::KvSync(KvSync {
                player_id: player,
                origin: "a".to_string(),
                operation: SyncOperation::PartialUpdate,
                version: 12,
                data: kv,
            }),
            Packet::ChunkData(ChunkData {
                request_id: Some(player),
                source_server: "a".to_string(),
                target_server: "b".to_string(),
                action: ChunkAction::Response,
                chunk_x: -4,
                chunk_z: 9,
                timestamp: 11,
                payload: vec![7; 300],
            }),
        ]
    }

    #[test]
    fn test_every_variant_round_trips() {
        for packet in sample_packets() {
            assert_eq!(round_trip(packet.clone()), packet);
        }
    }

    #[test]
    fn test_unknown_id_decodes_to_none() {
        assert!(Packet::decode_payload(0x7E, Bytes::new()).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for packet in sample_packets() {
            if packet.id() == ids::NETWORK_STATE && seen.contains(&packet.id()) {
                continue;
            }
            assert!(seen.insert(packet.id()), "duplicate id for {}", packet.name());
        }
    }

    #[test]
    fn test_priorities() {
        let packets = sample_packets();
        assert_eq!(packets[0].priority(), Priority::Critical);
        assert_eq!(packets[4].priority(), Priority::Normal);
        assert_eq!(packets[7].priority(), Priority::Low);
        assert!(Priority::Critical > Priority::Low);
    }
}
