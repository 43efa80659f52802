//! Payload structs for every message variant, grouped by concern

mod control;
mod data;
mod state;

pub use control::{
    CircuitBreakerTripped, Handshake, HandshakeResult, Heartbeat, HeartbeatAck, ProtocolErrorReport,
    ERROR_INTERNAL, ERROR_MALFORMED_PACKET, ERROR_UNKNOWN_PACKET,
};
pub use data::{
    BoundaryRegion, BoxRegion, ChunkAction, ChunkData, EventBroadcast, EventPlayer, KvSync, PortalData,
    PortalKind, PortalSync, SyncOperation, TransferRequest,
};
pub use state::{DataPoint, MetricsReport, NetworkState, NodeSnapshot, ServerSummary};

use crate::error::Result;
use bytes::{Bytes, BytesMut};

/// Encode/decode pair implemented by every payload.
pub trait Payload: Sized {
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;
    fn decode(buf: &mut Bytes) -> Result<Self>;
}
