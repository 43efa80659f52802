use super::Payload;
use crate::error::Result;
use crate::wire::*;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

pub const ERROR_UNKNOWN_PACKET: &str = "UNKNOWN_PACKET";
pub const ERROR_MALFORMED_PACKET: &str = "MALFORMED_PACKET";
pub const ERROR_INTERNAL: &str = "INTERNAL_ERROR";

/// First message a node sends after the transport opens.
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub protocol_version: u32,
    pub node_name: String,
    pub secret_key: String,
    pub timestamp: u64,
}

impl Payload for Handshake {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.protocol_version);
        put_string(buf, &self.node_name)?;
        put_string(buf, &self.secret_key)?;
        buf.put_u64(self.timestamp);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            protocol_version: get_u32(buf)?,
            node_name: get_string(buf)?,
            secret_key: get_string(buf)?,
            timestamp: get_u64(buf)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    pub success: bool,
    pub negotiated_version: u32,
    pub reason: String,
    pub server_config: HashMap<String, String>,
}

impl HandshakeResult {
    pub fn accepted(negotiated_version: u32) -> Self {
        Self {
            success: true,
            negotiated_version,
            reason: String::new(),
            server_config: HashMap::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            negotiated_version: 0,
            reason: reason.into(),
            server_config: HashMap::new(),
        }
    }
}

impl Payload for HandshakeResult {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_bool(buf, self.success);
        buf.put_u32(self.negotiated_version);
        put_string(buf, &self.reason)?;
        put_property_map(buf, &self.server_config)
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            success: get_bool(buf)?,
            negotiated_version: get_u32(buf)?,
            reason: get_string(buf)?,
            server_config: get_property_map(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub timestamp: u64,
    pub sequence: u32,
}

impl Payload for Heartbeat {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u64(self.timestamp);
        buf.put_u32(self.sequence);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            timestamp: get_u64(buf)?,
            sequence: get_u32(buf)?,
        })
    }
}

/// Echo of a [`Heartbeat`] with the master's processing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub original_timestamp: u64,
    pub sequence: u32,
    pub processing_delay_micros: u64,
}

impl Payload for HeartbeatAck {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u64(self.original_timestamp);
        buf.put_u32(self.sequence);
        buf.put_u64(self.processing_delay_micros);
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            original_timestamp: get_u64(buf)?,
            sequence: get_u32(buf)?,
            processing_delay_micros: get_u64(buf)?,
        })
    }
}

/// Directive asking a node to stop sending telemetry for `duration_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerTripped {
    pub drop_priority_threshold: i32,
    pub duration_ms: u64,
    pub reason: String,
}

impl Payload for CircuitBreakerTripped {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i32(self.drop_priority_threshold);
        buf.put_u64(self.duration_ms);
        put_string(buf, &self.reason)
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            drop_priority_threshold: get_i32(buf)?,
            duration_ms: get_u64(buf)?,
            reason: get_string(buf)?,
        })
    }
}

/// Reply sent when a frame could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolErrorReport {
    pub failed_packet_id: u32,
    pub error_code: String,
    pub details: String,
}

impl ProtocolErrorReport {
    pub fn unknown_packet(packet_id: u32) -> Self {
        Self {
            failed_packet_id: packet_id,
            error_code: ERROR_UNKNOWN_PACKET.to_string(),
            details: format!("Unknown packet ID: 0x{:02x}", packet_id),
        }
    }

    pub fn malformed_packet(packet_id: u32, details: impl Into<String>) -> Self {
        Self {
            failed_packet_id: packet_id,
            error_code: ERROR_MALFORMED_PACKET.to_string(),
            details: truncate_details(details.into()),
        }
    }

    pub fn internal_error(packet_id: u32, details: impl Into<String>) -> Self {
        Self {
            failed_packet_id: packet_id,
            error_code: ERROR_INTERNAL.to_string(),
            details: truncate_details(details.into()),
        }
    }
}

// Details come from decode errors and may embed peer data
fn truncate_details(mut details: String) -> String {
    let max = crate::MAX_PROPERTY_VALUE_SIZE;
    if details.len() > max {
        let mut end = max;
        while !details.is_char_boundary(end) {
            end -= 1;
        }
        details.truncate(end);
    }
    details
}

impl Payload for ProtocolErrorReport {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.failed_packet_id);
        put_string(buf, &self.error_code)?;
        put_string(buf, &self.details)
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            failed_packet_id: get_u32(buf)?,
            error_code: get_string(buf)?,
            details: get_string(buf)?,
        })
    }
}
