//! Per-connection protocol handling on the master
//!
//! Every accepted socket runs one reader loop (this module) and one writer
//! task. The reader enforces the authentication deadline, applies the
//! per-connection rate limit and dispatches decoded packets.

use crate::auth::AuthOutcome;
use crate::network::MasterContext;
use crate::rate_limiter::RateLimiter;
use crate::registry::{ConnectionHandle, NodeSession};
use log::{debug, error, info, warn};
use shared::messages::{Handshake, HandshakeResult, Heartbeat, HeartbeatAck};
use shared::transport::run_writer;
use shared::utils::current_millis;
use shared::{Decoded, FleetEvent, Packet, PacketReader, PacketWriter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Flow {
    Continue,
    Close(String),
}

/// Runs one node connection to completion.
pub async fn handle_connection(
    ctx: Arc<MasterContext>,
    stream: TcpStream,
    remote_addr: SocketAddr,
    connection_id: u64,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
    }

    let cancel = shutdown.child_token();
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(connection_id, tx, cancel.clone());

    let writer = tokio::spawn(run_writer(
        PacketWriter::new(write_half, ctx.config.compression_enabled),
        rx,
        cancel.clone(),
        remote_addr,
    ));

    let mut connection = NodeConnection::new(Arc::clone(&ctx), handle, remote_addr);
    let reason = connection.read_loop(PacketReader::new(read_half)).await;

    connection.handle.close();
    if tokio::time::timeout(ctx.config.shutdown_timeout(), writer).await.is_err() {
        warn!("Writer for {} did not finish in time", remote_addr);
    }
    connection.finish(&reason);
}

struct NodeConnection {
    ctx: Arc<MasterContext>,
    handle: ConnectionHandle,
    remote_addr: SocketAddr,
    limiter: RateLimiter,
    session: Option<Arc<NodeSession>>,
}

impl NodeConnection {
    fn new(ctx: Arc<MasterContext>, handle: ConnectionHandle, remote_addr: SocketAddr) -> Self {
        let limiter = RateLimiter::new(ctx.config.rate_limit_burst, ctx.config.rate_limit_refill_per_second);
        Self {
            ctx,
            handle,
            remote_addr,
            limiter,
            session: None,
        }
    }

    fn node_name(&self) -> String {
        match &self.session {
            Some(session) => session.node_id.clone(),
            None => self.remote_addr.to_string(),
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(&mut self, mut reader: PacketReader<R>) -> String {
        let cancel = self.handle.cancellation().clone();
        let auth_deadline = tokio::time::sleep(self.ctx.config.auth_timeout());
        tokio::pin!(auth_deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return "Connection closed".to_string(),
                _ = &mut auth_deadline, if self.session.is_none() => {
                    warn!("Authentication timeout for {}", self.remote_addr);
                    return "Authentication timeout".to_string();
                }
                result = reader.read_packet() => match result {
                    Ok(Some(decoded)) => {
                        if let Flow::Close(reason) = self.on_frame(decoded) {
                            return reason;
                        }
                    }
                    Ok(None) => return "Connection closed by peer".to_string(),
                    Err(e) => {
                        warn!("Closing connection to {}: {}", self.node_name(), e);
                        return format!("Protocol error: {}", e);
                    }
                },
            }
        }
    }

    fn on_frame(&mut self, decoded: Decoded) -> Flow {
        if !self.limiter.try_acquire() {
            warn!("Rate limit exceeded for {}, dropping frame", self.node_name());
            return Flow::Continue;
        }

        match decoded {
            Decoded::Rejected(report) => {
                error!("Rejected frame from {}: {}", self.node_name(), report.details);
                self.handle.send(Packet::ProtocolError(report));
                Flow::Continue
            }
            Decoded::Packet(Packet::Handshake(handshake)) => self.on_handshake(handshake),
            Decoded::Packet(packet) => match self.session.clone() {
                Some(session) => self.dispatch(&session, packet),
                None => {
                    debug!("Ignoring {} from unauthenticated {}", packet.name(), self.remote_addr);
                    Flow::Continue
                }
            },
        }
    }

    fn on_handshake(&mut self, handshake: Handshake) -> Flow {
        let outcome = self.ctx.auth.authenticate(
            &handshake,
            self.session.is_some(),
            self.remote_addr,
            self.handle.clone(),
        );

        match outcome {
            AuthOutcome::Accepted(session) => {
                self.handle.send(Packet::HandshakeResult(HandshakeResult::accepted(
                    self.ctx.auth.protocol_version(),
                )));
                self.session = Some(Arc::clone(&session));

                let now = current_millis();
                self.ctx.events.publish(&FleetEvent::AuthenticationCompleted {
                    node_id: session.node_id.clone(),
                    success: true,
                    reason: None,
                    timestamp: now,
                });
                self.ctx.events.publish(&FleetEvent::NodeConnected {
                    node_id: session.node_id.clone(),
                    remote_addr: self.remote_addr,
                    timestamp: now,
                });
                self.ctx.broadcaster.trigger_emergency_broadcast();
                Flow::Continue
            }
            AuthOutcome::Rejected(rejection) => {
                let reason = rejection.reason();
                self.handle.send(Packet::HandshakeResult(HandshakeResult::rejected(reason.clone())));
                if !rejection.closes_connection() {
                    return Flow::Continue;
                }

                self.ctx.events.publish(&FleetEvent::AuthenticationCompleted {
                    node_id: handshake.node_name,
                    success: false,
                    reason: Some(reason.clone()),
                    timestamp: current_millis(),
                });
                Flow::Close(reason)
            }
        }
    }

    fn dispatch(&self, session: &NodeSession, packet: Packet) -> Flow {
        match packet {
            Packet::Heartbeat(heartbeat) => self.on_heartbeat(session, heartbeat),
            Packet::NodeSnapshot(snapshot) => {
                session.with_state(|state| state.update_from_snapshot(&snapshot));
            }
            Packet::MetricsReport(report) => {
                debug!(
                    "Metrics from {}: {} tps samples, {} player samples, {} counters",
                    session.node_id,
                    report.tps_history.len(),
                    report.player_history.len(),
                    report.counters.len()
                );
                session.with_state(|state| state.record_counters(&report.counters));
            }
            Packet::EventBroadcast(event) => {
                let delivered = self.ctx.router.route_event(&session.node_id, &event);
                debug!("Event {} from {} routed to {} nodes", event.event_type, session.node_id, delivered);
            }
            Packet::TransferRequest(request) => {
                let target = request.target_server.clone();
                if !self.ctx.router.send_to(&target, Packet::TransferRequest(request)) {
                    warn!("Transfer target {} from {} is not connected", target, session.node_id);
                }
            }
            Packet::ChunkData(chunk) => {
                let target = chunk.target_server.clone();
                if !self.ctx.router.send_to(&target, Packet::ChunkData(chunk)) {
                    debug!("Chunk target {} from {} is not connected", target, session.node_id);
                }
            }
            packet @ Packet::PortalSync(_) => {
                self.ctx.router.broadcast_except(packet, &session.node_id);
            }
            Packet::KvSync(sync) => {
                if let Some(reply) = self.ctx.kv.handle(&session.node_id, sync) {
                    self.handle.send(reply);
                }
            }
            Packet::ProtocolError(report) => {
                error!(
                    "Node {} reported protocol error {} for packet 0x{:02x}: {}",
                    session.node_id, report.error_code, report.failed_packet_id, report.details
                );
            }
            other @ (Packet::Handshake(_)
            | Packet::HandshakeResult(_)
            | Packet::HeartbeatAck(_)
            | Packet::NetworkState(_)
            | Packet::CircuitBreakerTripped(_)) => {
                warn!("Unexpected {} from node {}", other.name(), session.node_id);
            }
        }
        Flow::Continue
    }

    fn on_heartbeat(&self, session: &NodeSession, heartbeat: Heartbeat) {
        let started = Instant::now();
        session.with_state(|state| state.update_heartbeat());
        let ack = HeartbeatAck {
            original_timestamp: heartbeat.timestamp,
            sequence: heartbeat.sequence,
            processing_delay_micros: started.elapsed().as_micros() as u64,
        };
        self.handle.send(Packet::HeartbeatAck(ack));
    }

    fn finish(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            debug!("Connection from {} closed before authentication: {}", self.remote_addr, reason);
            return;
        };

        if self
            .ctx
            .registry
            .unregister_connection(&session.node_id, self.handle.id())
            .is_some()
        {
            info!("Node {} disconnected: {}", session.node_id, reason);
            self.ctx.events.publish(&FleetEvent::NodeDisconnected {
                node_id: session.node_id.clone(),
                reason: reason.to_string(),
                timestamp: current_millis(),
            });
            self.ctx.broadcaster.trigger_emergency_broadcast();
        }
    }
}
