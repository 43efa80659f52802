use super::Payload;
use crate::error::Result;
use crate::wire::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Periodic metrics report from one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    pub capture_timestamp: u64,
    pub extra_data: HashMap<String, String>,
}

impl Payload for NodeSnapshot {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.online_players);
        buf.put_u32(self.max_players);
        buf.put_f64(self.tps);
        buf.put_u64(self.capture_timestamp);
        put_property_map(buf, &self.extra_data)
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            online_players: get_u32(buf)?,
            max_players: get_u32(buf)?,
            tps: get_f64(buf)?,
            capture_timestamp: get_u64(buf)?,
            extra_data: get_property_map(buf)?,
        })
    }
}

/// Per-node entry of the global state, copied from the registry at broadcast time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub name: String,
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    pub last_update: u64,
    pub extra_data: HashMap<String, String>,
}

impl ServerSummary {
    pub fn is_online(&self, now: u64, threshold_ms: u64) -> bool {
        now.saturating_sub(self.last_update) < threshold_ms
    }

    pub fn load_percentage(&self) -> f64 {
        if self.max_players == 0 {
            return 0.0;
        }
        f64::from(self.online_players) / f64::from(self.max_players) * 100.0
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.name)?;
        buf.put_u32(self.online_players);
        buf.put_u32(self.max_players);
        buf.put_f64(self.tps);
        buf.put_u64(self.last_update);
        put_property_map(buf, &self.extra_data)
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            name: get_string(buf)?,
            online_players: get_u32(buf)?,
            max_players: get_u32(buf)?,
            tps: get_f64(buf)?,
            last_update: get_u64(buf)?,
            extra_data: get_property_map(buf)?,
        })
    }
}

/// Versioned global snapshot fanned out by the master.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub global_online: u32,
    pub server_count: u32,
    pub state_version: u64,
    pub ttl_seconds: u32,
    pub global_properties: HashMap<String, String>,
    pub routing_hints: HashMap<String, String>,
    pub servers: Vec<ServerSummary>,
}

impl NetworkState {
    pub fn server(&self, name: &str) -> Option<&ServerSummary> {
        self.servers
            .iter()
            .find(|server| server.name.eq_ignore_ascii_case(name))
    }
}

impl Payload for NetworkState {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.global_online);
        buf.put_u32(self.server_count);
        buf.put_u64(self.state_version);
        buf.put_u32(self.ttl_seconds);
        put_property_map(buf, &self.global_properties)?;
        put_property_map(buf, &self.routing_hints)?;
        buf.put_i32(self.servers.len() as i32);
        for server in &self.servers {
            server.encode(buf)?;
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let global_online = get_u32(buf)?;
        let server_count = get_u32(buf)?;
        let state_version = get_u64(buf)?;
        let ttl_seconds = get_u32(buf)?;
        let global_properties = get_property_map(buf)?;
        let routing_hints = get_property_map(buf)?;

        // Older masters stop before the server list
        let mut servers = Vec::new();
        if buf.has_remaining() {
            let count = get_count(buf, "server list")?;
            servers.reserve(count);
            for _ in 0..count {
                servers.push(ServerSummary::decode(buf)?);
            }
        }

        Ok(Self {
            global_online,
            server_count,
            state_version,
            ttl_seconds,
            global_properties,
            routing_hints,
            servers,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: u64,
    pub value: f64,
}

/// Low-priority telemetry history with named counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsReport {
    pub tps_history: Vec<DataPoint>,
    pub player_history: Vec<DataPoint>,
    pub counters: HashMap<String, u64>,
}

fn put_points(buf: &mut BytesMut, points: &[DataPoint]) {
    put_var_int(buf, points.len() as u32);
    for point in points {
        buf.put_u64(point.timestamp);
        buf.put_f64(point.value);
    }
}

fn get_points(buf: &mut Bytes) -> Result<Vec<DataPoint>> {
    let count = get_var_int(buf)? as usize;
    let mut points = Vec::with_capacity(count.min(buf.remaining() / 16));
    for _ in 0..count {
        points.push(DataPoint {
            timestamp: get_u64(buf)?,
            value: get_f64(buf)?,
        });
    }
    Ok(points)
}

impl Payload for MetricsReport {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        put_points(buf, &self.tps_history);
        put_points(buf, &self.player_history);
        put_var_int(buf, self.counters.len() as u32);
        for (name, value) in &self.counters {
            put_string(buf, name)?;
            buf.put_u64(*value);
        }
        Ok(())
    }

    fn decode(buf: &mut Bytes) -> Result<Self> {
        let tps_history = get_points(buf)?;
        let player_history = get_points(buf)?;
        let count = get_var_int(buf)? as usize;
        let mut counters = HashMap::with_capacity(count.min(buf.remaining()));
        for _ in 0..count {
            let name = get_string(buf)?;
            counters.insert(name, get_u64(buf)?);
        }
        Ok(Self {
            tps_history,
            player_history,
            counters,
        })
    }
}
