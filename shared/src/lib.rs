pub mod codec;
pub mod error;
pub mod events;
pub mod messages;
pub mod packet;
pub mod replication;
pub mod transport;
pub mod utils;
pub mod wire;

pub use codec::{Decoded, FrameDecoder, FrameEncoder, PacketReader, PacketWriter};
pub use error::ProtocolError;
pub use events::{ConnectionState, EventBus, EventKind, FleetEvent, SubscriptionId};
pub use packet::{Packet, Priority};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 3000;

pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const COMPRESSION_THRESHOLD: usize = 1024;
pub const MAX_PROPERTY_VALUE_SIZE: usize = 1024;
pub const MAX_PROPERTY_COUNT: usize = 1000;

pub const CLOCK_SKEW_TOLERANCE_MS: u64 = 5_000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 15_000;
pub const BROADCAST_INTERVAL_MS: u64 = 500;
pub const SNAPSHOT_INTERVAL_MS: u64 = 200;
pub const METRICS_INTERVAL_MS: u64 = 10_000;
pub const METRICS_HISTORY_CAPACITY: usize = 100;

pub const RECONNECT_INITIAL_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const RECONNECT_BACKOFF_MULTIPLIER: u32 = 2;
pub const CONNECTION_TIMEOUT_MS: u64 = 10_000;
pub const AUTH_TIMEOUT_MS: u64 = 10_000;
pub const STATE_STALE_THRESHOLD_MS: u64 = 15_000;
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

pub const CIRCUIT_BREAKER_DURATION_MS: u64 = 30_000;
pub const RATE_LIMIT_PER_SECOND: u32 = 100;
pub const RATE_LIMIT_BURST: u32 = 200;

/// Routing hint key for the least-loaded node of a category.
pub fn least_loaded_hint_key(category: &str) -> String {
    format!("{}_least_loaded", category)
}

/// Extra-data key nodes use to declare their category.
pub const GAME_TYPE_KEY: &str = "game_type";
