//! Connection write path shared by master and node
//!
//! Each connection owns exactly one writer task fed by an unbounded queue.
//! Any number of tasks may enqueue packets; frames reach the socket in queue
//! order and are never interleaved.

use crate::codec::PacketWriter;
use crate::error::ProtocolError;
use crate::packet::Packet;
use log::{debug, error, warn};
use std::net::SocketAddr;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drains `outbound` into `writer` until the queue closes or `cancel` fires.
///
/// Packets already queued when cancellation is requested are still written,
/// so a final reply sent just before closing reaches the peer. Only socket
/// failures cancel the connection; a packet that cannot be encoded is
/// dropped and the queue keeps draining.
pub async fn run_writer<W>(
    mut writer: PacketWriter<W>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    cancel: CancellationToken,
    peer: SocketAddr,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => match next {
                Some(packet) => {
                    match writer.write_packet(&packet).await {
                        Ok(()) => {}
                        Err(ProtocolError::Io(e)) => {
                            warn!("Failed to write {} to {}: {}", packet.name(), peer, e);
                            break;
                        }
                        Err(e) => error!("Dropping unencodable {} for {}: {}", packet.name(), peer, e),
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    cancel.cancel();
    if let Err(e) = writer.shutdown().await {
        debug!("Error shutting down writer for {}: {}", peer, e);
    }
}
