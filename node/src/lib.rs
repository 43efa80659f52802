//! # Fleet Node Library
//!
//! Everything a game server needs to join a fleet: a persistent connection to
//! the master, a local copy of the fleet-wide network state and the services
//! built on top of it.
//!
//! ## Connection Lifecycle
//!
//! [`NodeClient`] connects, authenticates with the configured secret and then
//! runs three timers:
//! - **Heartbeat**: liveness ping; the acknowledgement yields round-trip latency
//! - **Snapshot**: player counts, TPS and extra data, every 200ms by default
//! - **Metrics**: TPS/player history and counters, every 10s by default
//!
//! Snapshots and metrics are suppressed while the master has tripped the
//! circuit breaker. Lost connections are retried with exponential backoff
//! (1s doubling up to 30s by default), reset after every successful connect.
//!
//! ## Services
//!
//! - `state_cache`: latest `NetworkState` and staleness
//! - `balancer`: strategy-based server selection with slot reservations
//! - `kv`: per-player replicated key/value data
//! - `event_bridge`: typed pub/sub for cross-server gameplay events
//! - `api`: [`FleetApi`], the facade combining the above
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use node::{FleetApi, NodeClient, NodeConfig, SnapshotCollector};
//! use shared::EventBus;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::new("127.0.0.1:3000", "lobby-1", "change-me");
//!     let collector = SnapshotCollector::new(|| 12, || 100, || 20.0);
//!     let client = NodeClient::new(config, EventBus::new(), collector)?;
//!
//!     let api = FleetApi::builder(client.clone()).load_balancer().kv().build();
//!     client.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     println!("{} players online across the fleet", api.global_online());
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backoff;
pub mod balancer;
pub mod breaker;
pub mod config;
pub mod error;
pub mod event_bridge;
pub mod kv;
pub mod network;
pub mod outbound;
pub mod snapshot;
pub mod state_cache;

pub use api::FleetApi;
pub use balancer::{BalancingStrategy, LoadBalancerService};
pub use config::{ConfigError, NodeConfig};
pub use error::NodeError;
pub use network::{ConnectionStatus, NodeClient};
pub use snapshot::SnapshotCollector;
