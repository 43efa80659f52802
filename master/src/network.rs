//! Master network layer: TCP accept loop, shared context and control handle

use crate::auth::{AuthGuard, SecretKeyValidator};
use crate::broadcaster::{StateBroadcaster, TripDirective, TripPolicy};
use crate::config::MasterConfig;
use crate::connection::handle_connection;
use crate::error::MasterError;
use crate::kv::KvAuthority;
use crate::registry::{NodeRegistry, NodeSession};
use crate::router::EventRouter;
use log::{error, info, warn};
use shared::messages::NetworkState;
use shared::replication::ReplicatedStore;
use shared::{EventBus, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Origin name the master stamps on replication traffic it originates
pub const MASTER_ORIGIN: &str = "master";

/// State shared by every connection task
pub struct MasterContext {
    pub config: MasterConfig,
    pub registry: Arc<NodeRegistry>,
    pub auth: AuthGuard,
    pub broadcaster: Arc<StateBroadcaster>,
    pub router: Arc<EventRouter>,
    pub kv: KvAuthority,
    pub events: EventBus,
}

impl MasterContext {
    pub fn new(config: MasterConfig, events: EventBus) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        let validator = SecretKeyValidator::new(&config.secret_keys);
        let auth = AuthGuard::new(validator, Arc::clone(&registry), PROTOCOL_VERSION);
        let broadcaster = Arc::new(StateBroadcaster::new(Arc::clone(&registry), events.clone(), &config));
        let router = Arc::new(EventRouter::new(Arc::clone(&registry)));
        let kv = KvAuthority::new(Arc::clone(&router), MASTER_ORIGIN);

        Self {
            config,
            registry,
            auth,
            broadcaster,
            router,
            kv,
            events,
        }
    }
}

/// Fleet master accepting node connections
pub struct MasterServer {
    listener: TcpListener,
    ctx: Arc<MasterContext>,
    shutdown: CancellationToken,
}

impl MasterServer {
    /// Validates the configuration and binds the listening socket
    pub async fn bind(config: MasterConfig, events: EventBus) -> Result<Self, MasterError> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_address()).await?;
        info!("Master listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            ctx: Arc::new(MasterContext::new(config, events)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MasterError> {
        Ok(self.listener.local_addr()?)
    }

    /// Control handle usable while `run` owns the server
    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            ctx: Arc::clone(&self.ctx),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accepts connections until shut down through a [`MasterHandle`]
    pub async fn run(self) -> Result<(), MasterError> {
        let ctx = self.ctx;
        let shutdown = self.shutdown;

        let broadcaster = tokio::spawn(
            Arc::clone(&ctx.broadcaster).run(ctx.config.broadcast_interval(), shutdown.clone()),
        );
        let mut connections = JoinSet::new();
        let mut next_connection_id: u64 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        next_connection_id += 1;
                        info!("Accepted connection {} from {}", next_connection_id, addr);
                        connections.spawn(handle_connection(
                            Arc::clone(&ctx),
                            stream,
                            addr,
                            next_connection_id,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Shutting down master with {} connected nodes", ctx.registry.count());
        drop(self.listener);
        for session in ctx.registry.all() {
            session.connection().close();
        }

        let drain = async {
            while connections.join_next().await.is_some() {}
            if let Err(e) = broadcaster.await {
                error!("Broadcaster task failed: {}", e);
            }
        };
        if tokio::time::timeout(ctx.config.shutdown_timeout(), drain).await.is_err() {
            warn!("Shutdown timed out, aborting remaining connections");
        }

        info!("Master stopped");
        Ok(())
    }
}

/// Cloneable handle for operating a running master
#[derive(Clone)]
pub struct MasterHandle {
    ctx: Arc<MasterContext>,
    shutdown: CancellationToken,
}

impl MasterHandle {
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.ctx.registry
    }

    pub fn broadcaster(&self) -> &Arc<StateBroadcaster> {
        &self.ctx.broadcaster
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.ctx.router
    }

    pub fn kv_store(&self) -> &ReplicatedStore {
        self.ctx.kv.store()
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        self.ctx.registry.get(node_id)
    }

    /// Subscribes `node_id` to forwarded events of `event_type` ("*" for all)
    pub fn register_event_subscription(&self, event_type: &str, node_id: &str) {
        self.ctx.router.register_subscription(event_type, node_id);
    }

    pub fn set_trip_policy(&self, policy: Arc<dyn TripPolicy>) {
        self.ctx.broadcaster.set_trip_policy(policy);
    }

    /// Trips the circuit breaker on one node; false if it is not connected
    pub fn trip_circuit_breaker(&self, node_id: &str, directive: TripDirective) -> bool {
        match self.ctx.registry.get(node_id) {
            Some(session) => self.ctx.broadcaster.trip(&session, directive),
            None => false,
        }
    }

    /// Broadcasts the current network state immediately
    pub fn broadcast_now(&self) -> NetworkState {
        self.ctx.broadcaster.broadcast()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
