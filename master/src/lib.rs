//! # Fleet Master Library
//!
//! The master is the central control plane of a game-server fleet. Every game
//! server (a "node") keeps one long-lived TCP connection to it, authenticates
//! with a shared secret and then streams heartbeats and state snapshots. The
//! master aggregates those snapshots into a versioned network view and pushes
//! it back to every node.
//!
//! ## Core Responsibilities
//!
//! ### Node Sessions
//! Tracks one session per authenticated node:
//! - Handshake validation (protocol version, secret key, duplicate names)
//! - Liveness tracking through heartbeats and snapshots
//! - Eviction of silent or closed connections
//!
//! ### State Broadcasting
//! Periodically sends a `NetworkState` to all nodes when anything changed, with
//! a monotonically increasing version. Membership changes trigger an immediate
//! emergency broadcast instead of waiting for the next tick.
//!
//! ### Routing
//! Relays cross-server traffic between nodes: player transfers, chunk data,
//! portal definitions, gameplay events and key/value replication.
//!
//! ### Flow Control
//! Each connection is rate limited with a token bucket. Nodes that need to
//! shed telemetry can be sent a circuit-breaker directive, either explicitly
//! or from a pluggable [`broadcaster::TripPolicy`].
//!
//! ## Module Organization
//!
//! - `config`: [`MasterConfig`] and its validation
//! - `registry`: connection handles, per-node state, the session table
//! - `auth`: secret-key validation and the handshake guard
//! - `rate_limiter`: lock-free token bucket
//! - `broadcaster`: network-state aggregation, eviction, breaker trips
//! - `router`: event, transfer and portal relaying
//! - `kv`: the master's replica of per-player key/value data
//! - `connection`: per-socket read loop and packet dispatch
//! - `network`: listener, accept loop and [`MasterHandle`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use master::{MasterConfig, MasterServer};
//! use shared::EventBus;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MasterConfig::with_secret("change-me");
//!     let server = MasterServer::bind(config, EventBus::new()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod kv;
pub mod network;
pub mod rate_limiter;
pub mod registry;
pub mod router;

pub use config::{ConfigError, MasterConfig};
pub use error::MasterError;
pub use network::{MasterHandle, MasterServer};
