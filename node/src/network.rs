//! Node network client: master connection, reconnection and periodic telemetry

use crate::backoff::ReconnectBackoff;
use crate::breaker::CircuitBreakerGate;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::event_bridge::EventBridge;
use crate::kv::DistributedKv;
use crate::outbound::Outbound;
use crate::snapshot::SnapshotCollector;
use crate::state_cache::NetworkStateCache;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use shared::messages::{Handshake, Heartbeat};
use shared::transport::run_writer;
use shared::utils::current_millis;
use shared::{
    ConnectionState, Decoded, EventBus, FleetEvent, Packet, PacketReader, PacketWriter, PROTOCOL_VERSION,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Point-in-time view of the master connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub latency_ms: u64,
    pub stale: bool,
    pub master_address: String,
    pub state: ConnectionState,
}

enum Flow {
    Continue,
    Close(String),
}

#[derive(Default)]
struct InboundRoutes {
    kv: RwLock<Option<Arc<DistributedKv>>>,
    bridge: RwLock<Option<Arc<EventBridge>>>,
}

/// Keeps one node connected to the master.
///
/// After [`start`](Self::start) the client owns four tasks: the connection
/// loop (connect, authenticate, read, back off, repeat) and three timers
/// for heartbeats, snapshots and metrics reports. The timers only send while
/// authenticated; snapshots and metrics are also held back while the
/// circuit breaker is tripped.
pub struct NodeClient {
    config: NodeConfig,
    events: EventBus,
    cache: Arc<NetworkStateCache>,
    collector: Arc<SnapshotCollector>,
    gate: CircuitBreakerGate,
    outbound: Outbound,
    routes: InboundRoutes,
    heartbeat_sequence: AtomicU32,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeClient {
    pub fn new(config: NodeConfig, events: EventBus, collector: SnapshotCollector) -> Result<Arc<Self>, NodeError> {
        config.validate()?;
        let cache = Arc::new(NetworkStateCache::new(config.state_stale_threshold_ms));
        Ok(Arc::new(Self {
            outbound: Outbound::new(events.clone()),
            config,
            events,
            cache,
            collector: Arc::new(collector),
            gate: CircuitBreakerGate::new(),
            routes: InboundRoutes::default(),
            heartbeat_sequence: AtomicU32::new(0),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state_cache(&self) -> &Arc<NetworkStateCache> {
        &self.cache
    }

    pub fn collector(&self) -> &Arc<SnapshotCollector> {
        &self.collector
    }

    pub fn circuit_breaker(&self) -> &CircuitBreakerGate {
        &self.gate
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Routes incoming `KvSync` packets to `kv`.
    pub fn attach_kv(&self, kv: Arc<DistributedKv>) {
        *self.routes.kv.write() = Some(kv);
    }

    /// Routes incoming `EventBroadcast` packets to `bridge`.
    pub fn attach_event_bridge(&self, bridge: Arc<EventBridge>) {
        *self.routes.bridge.write() = Some(bridge);
    }

    pub fn state(&self) -> ConnectionState {
        self.outbound.state()
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }

    pub fn latency_ms(&self) -> u64 {
        self.outbound.latency_ms()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let connected = self.is_connected();
        let stale = self.cache.is_stale();
        let state = match self.state() {
            ConnectionState::Connected if stale => ConnectionState::Degraded,
            state => state,
        };
        ConnectionStatus {
            connected,
            latency_ms: if connected { self.latency_ms() } else { 0 },
            stale,
            master_address: self.config.master_address.clone(),
            state,
        }
    }

    /// Spawns the connection loop and the periodic senders.
    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(self).connection_loop()));
        tasks.push(self.spawn_periodic(self.config.heartbeat_interval(), |client| client.send_heartbeat()));
        tasks.push(self.spawn_periodic(self.config.snapshot_interval(), |client| client.send_snapshot()));
        tasks.push(self.spawn_periodic(self.config.metrics_interval(), |client| client.send_metrics()));

        info!("Node client {} started", self.config.node_name);
        Ok(())
    }

    /// Stops all tasks and closes the connection, waiting a bounded time.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.outbound.detach();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let drain = async {
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Node task failed: {}", e);
                }
            }
        };
        if timeout(self.config.shutdown_timeout(), drain).await.is_err() {
            warn!("Node tasks did not stop within {:?}", self.config.shutdown_timeout());
        }

        self.outbound.transition(ConnectionState::Disconnected);
        info!("Node client {} stopped", self.config.node_name);
    }

    fn spawn_periodic<F>(self: &Arc<Self>, period: Duration, action: F) -> JoinHandle<()>
    where
        F: Fn(&NodeClient) + Send + 'static,
    {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => action(&*client),
                    _ = client.shutdown.cancelled() => break,
                }
            }
        })
    }

    fn send_heartbeat(&self) {
        if !self.is_connected() {
            return;
        }

        let sequence = self.heartbeat_sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.outbound.send(Packet::Heartbeat(Heartbeat {
            timestamp: current_millis(),
            sequence,
        }));

        let next = if self.cache.is_stale() {
            ConnectionState::Degraded
        } else {
            ConnectionState::Connected
        };
        self.outbound.transition(next);
    }

    fn send_snapshot(&self) {
        if !self.is_connected() {
            return;
        }
        if self.gate.is_active() {
            self.collector.increment_counter("snapshots_suppressed", 1);
            return;
        }
        if self.outbound.send(Packet::NodeSnapshot(self.collector.capture())) {
            self.collector.increment_counter("snapshots_sent", 1);
        }
    }

    fn send_metrics(&self) {
        if !self.is_connected() || self.gate.is_active() {
            return;
        }
        self.outbound.send(Packet::MetricsReport(self.collector.metrics_report()));
    }

    async fn connection_loop(self: Arc<Self>) {
        let mut backoff = ReconnectBackoff::new(
            self.config.reconnect_initial_delay(),
            self.config.reconnect_max_delay(),
        );

        while !self.shutdown.is_cancelled() {
            self.outbound.transition(ConnectionState::Connecting);
            info!("Connecting to master at {}", self.config.master_address);

            let attempt = self
                .until_shutdown(timeout(
                    self.config.connection_timeout(),
                    TcpStream::connect(&self.config.master_address),
                ))
                .await;
            match attempt {
                None => break,
                Some(Ok(Ok(stream))) => {
                    backoff.reset();
                    info!("Connected to master");
                    let reason = self.run_session(stream).await;
                    warn!("Connection to master lost: {}", reason);
                }
                Some(Ok(Err(e))) => error!("Failed to connect to master: {}", e),
                Some(Err(_)) => error!(
                    "Connection to master timed out after {}ms",
                    self.config.connection_timeout_ms
                ),
            }

            self.outbound.transition(ConnectionState::Disconnected);
            if self.shutdown.is_cancelled() {
                break;
            }

            self.outbound.transition(ConnectionState::Reconnecting);
            let delay = backoff.next_delay();
            info!("Reconnecting in {}ms", delay.as_millis());
            if self.until_shutdown(sleep(delay)).await.is_none() {
                break;
            }
        }
        debug!("Connection loop stopped");
    }

    async fn until_shutdown<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            output = future => Some(output),
            _ = self.shutdown.cancelled() => None,
        }
    }

    async fn run_session(&self, stream: TcpStream) -> String {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let peer = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => return format!("peer address unavailable: {}", e),
        };

        let cancel = self.shutdown.child_token();
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            PacketWriter::new(write_half, self.config.compression_enabled),
            rx,
            cancel.clone(),
            peer,
        ));

        self.outbound.attach(tx);
        self.outbound.transition(ConnectionState::Authenticating);
        self.outbound.send_unchecked(Packet::Handshake(Handshake {
            protocol_version: PROTOCOL_VERSION,
            node_name: self.config.node_name.clone(),
            secret_key: self.config.secret_key.clone(),
            timestamp: current_millis(),
        }));
        info!("Sent authentication handshake to master");

        let reason = self.read_loop(PacketReader::new(read_half), &cancel).await;

        self.outbound.detach();
        cancel.cancel();
        if timeout(self.config.shutdown_timeout(), writer).await.is_err() {
            warn!("Writer to master did not finish in time");
        }
        reason
    }

    async fn read_loop<R>(&self, mut reader: PacketReader<R>, cancel: &CancellationToken) -> String
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let auth_deadline = sleep(self.config.auth_timeout());
        tokio::pin!(auth_deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return "connection closed".to_string(),
                _ = &mut auth_deadline, if self.state() == ConnectionState::Authenticating => {
                    return "authentication timed out".to_string();
                }
                result = reader.read_packet() => match result {
                    Ok(Some(Decoded::Packet(packet))) => {
                        if let Flow::Close(reason) = self.handle_packet(packet) {
                            return reason;
                        }
                    }
                    Ok(Some(Decoded::Rejected(report))) => {
                        warn!("Rejected frame from master: {}", report.details);
                        self.outbound.send_unchecked(Packet::ProtocolError(report));
                    }
                    Ok(None) => return "closed by master".to_string(),
                    Err(e) => return format!("protocol error: {}", e),
                },
            }
        }
    }

    fn handle_packet(&self, packet: Packet) -> Flow {
        match packet {
            Packet::HandshakeResult(result) => {
                if result.success {
                    info!(
                        "Authentication successful, protocol version: {}",
                        result.negotiated_version
                    );
                    self.outbound.transition(ConnectionState::Connected);
                } else {
                    error!("Authentication failed: {}", result.reason);
                    return Flow::Close(format!("authentication failed: {}", result.reason));
                }
            }
            Packet::HeartbeatAck(ack) => {
                let rtt = current_millis().saturating_sub(ack.original_timestamp);
                self.outbound.set_latency_ms(rtt);
                debug!(
                    "Heartbeat ACK: RTT={}ms, processing={}us",
                    rtt, ack.processing_delay_micros
                );
            }
            Packet::NetworkState(state) => {
                debug!(
                    "Network state updated: v{}, {} global players, {} servers",
                    state.state_version, state.global_online, state.server_count
                );
                let event = FleetEvent::NetworkStateChanged {
                    global_online: state.global_online,
                    server_count: state.server_count,
                    version: state.state_version,
                    timestamp: current_millis(),
                };
                self.cache.update(state);
                if self.state() == ConnectionState::Degraded {
                    self.outbound.transition(ConnectionState::Connected);
                }
                self.events.publish(&event);
            }
            Packet::CircuitBreakerTripped(trip) => {
                warn!("Circuit breaker tripped: {} ({}ms)", trip.reason, trip.duration_ms);
                self.gate.trip(trip.duration_ms);
                self.events.publish(&FleetEvent::CircuitBreakerTripped {
                    node_id: None,
                    reason: trip.reason,
                    duration_ms: trip.duration_ms,
                    timestamp: current_millis(),
                });
            }
            Packet::ProtocolError(report) => {
                error!(
                    "Protocol error from master: {} - {} (packet 0x{:02x})",
                    report.error_code, report.details, report.failed_packet_id
                );
            }
            Packet::TransferRequest(request) => {
                self.events.publish(&FleetEvent::TransferRequested(request));
            }
            Packet::PortalSync(sync) => {
                self.events.publish(&FleetEvent::PortalsSynced(sync));
            }
            Packet::ChunkData(chunk) => {
                self.events.publish(&FleetEvent::ChunkReceived(chunk));
            }
            Packet::EventBroadcast(event) => match self.routes.bridge.read().as_ref() {
                Some(bridge) => {
                    bridge.handle_incoming(&event);
                }
                None => debug!("Dropping event {}: no event bridge attached", event.event_type),
            },
            Packet::KvSync(sync) => match self.routes.kv.read().as_ref() {
                Some(kv) => {
                    kv.handle_incoming(&sync);
                }
                None => debug!("Dropping kv sync for {}: no kv store attached", sync.player_id),
            },
            other @ (Packet::Handshake(_)
            | Packet::Heartbeat(_)
            | Packet::NodeSnapshot(_)
            | Packet::MetricsReport(_)) => {
                warn!("Unexpected packet from master: {}", other.name());
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::messages::{CircuitBreakerTripped, HandshakeResult, HeartbeatAck, NetworkState};
    use shared::EventKind;

    fn test_client() -> Arc<NodeClient> {
        let config = NodeConfig::new("127.0.0.1:1", "lobby-1", "secret");
        NodeClient::new(config, EventBus::new(), SnapshotCollector::new(|| 3, || 20, || 20.0)).unwrap()
    }

    fn attach(client: &NodeClient) -> mpsc::UnboundedReceiver<Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.outbound.attach(tx);
        client.outbound.transition(ConnectionState::Authenticating);
        rx
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = NodeConfig::new("127.0.0.1:1", "", "secret");
        let result = NodeClient::new(config, EventBus::new(), SnapshotCollector::new(|| 0, || 0, || 0.0));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_handshake_result_drives_state() {
        let client = test_client();
        let _rx = attach(&client);

        assert!(matches!(
            client.handle_packet(Packet::HandshakeResult(HandshakeResult::accepted(PROTOCOL_VERSION))),
            Flow::Continue
        ));
        assert_eq!(client.state(), ConnectionState::Connected);

        let rejected = HandshakeResult::rejected("Invalid secret key");
        assert!(matches!(
            client.handle_packet(Packet::HandshakeResult(rejected)),
            Flow::Close(_)
        ));
    }

    #[test]
    fn test_timers_respect_auth_and_breaker() {
        let client = test_client();
        let mut rx = attach(&client);

        client.send_heartbeat();
        client.send_snapshot();
        assert!(rx.try_recv().is_err());

        client.handle_packet(Packet::HandshakeResult(HandshakeResult::accepted(PROTOCOL_VERSION)));
        client.send_snapshot();
        assert!(matches!(rx.try_recv(), Ok(Packet::NodeSnapshot(_))));

        client.handle_packet(Packet::CircuitBreakerTripped(CircuitBreakerTripped {
            drop_priority_threshold: 1,
            duration_ms: 60_000,
            reason: "overloaded".to_string(),
        }));
        client.send_snapshot();
        client.send_metrics();
        assert!(rx.try_recv().is_err());
        assert_eq!(client.collector().counter("snapshots_suppressed"), 1);

        client.send_heartbeat();
        match rx.try_recv() {
            Ok(Packet::Heartbeat(heartbeat)) => assert_eq!(heartbeat.sequence, 1),
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_network_state_updates_cache_and_publishes() {
        let client = test_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.events().subscribe(EventKind::NetworkStateChanged, move |event| {
            if let FleetEvent::NetworkStateChanged { version, .. } = event {
                sink.lock().push(*version);
            }
        });

        client.handle_packet(Packet::NetworkState(NetworkState {
            global_online: 42,
            state_version: 9,
            ..NetworkState::default()
        }));

        assert_eq!(client.state_cache().global_online(), 42);
        assert_eq!(*seen.lock(), vec![9]);
    }

    #[test]
    fn test_heartbeat_ack_sets_latency() {
        let client = test_client();
        client.handle_packet(Packet::HeartbeatAck(HeartbeatAck {
            original_timestamp: current_millis() - 25,
            sequence: 1,
            processing_delay_micros: 10,
        }));
        assert!(client.latency_ms() >= 25);
    }

    #[test]
    fn test_status_reports_degraded_when_stale() {
        let client = test_client();
        let _rx = attach(&client);
        client.handle_packet(Packet::HandshakeResult(HandshakeResult::accepted(PROTOCOL_VERSION)));

        let status = client.connection_status();
        assert!(status.connected);
        assert!(status.stale);
        assert_eq!(status.state, ConnectionState::Degraded);
        assert_eq!(status.master_address, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_start_twice_and_shutdown() {
        let client = test_client();
        client.start().unwrap();
        assert!(matches!(client.start(), Err(NodeError::AlreadyStarted)));

        client.shutdown().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.tasks.lock().is_empty());
    }
}
