//! Shared write handle to the master connection

use log::{debug, info};
use parking_lot::Mutex;
use shared::{ConnectionState, EventBus, FleetEvent, Packet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Link {
    state: Mutex<ConnectionState>,
    sender: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    latency_ms: AtomicU64,
    events: EventBus,
}

/// Cloneable handle used by every node component that talks to the master.
///
/// The handle outlives individual connections: the client attaches the
/// writer queue of each new connection and detaches it on loss. Packets
/// handed to [`send`](Self::send) while not authenticated are dropped.
#[derive(Clone)]
pub struct Outbound {
    link: Arc<Link>,
}

impl Outbound {
    pub fn new(events: EventBus) -> Self {
        Self {
            link: Arc::new(Link {
                state: Mutex::new(ConnectionState::Disconnected),
                sender: Mutex::new(None),
                latency_ms: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.link.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Moves to `next`, publishing a state change event if it differs.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.link.state.lock();
            let previous = *state;
            *state = next;
            previous
        };
        if previous == next {
            return false;
        }

        debug!("Connection state {:?} -> {:?}", previous, next);
        self.link.events.publish(&FleetEvent::ConnectionStateChanged {
            previous,
            current: next,
        });
        true
    }

    pub(crate) fn attach(&self, sender: mpsc::UnboundedSender<Packet>) {
        *self.link.sender.lock() = Some(sender);
    }

    pub(crate) fn detach(&self) {
        if self.link.sender.lock().take().is_some() {
            info!("Detached from master connection");
        }
    }

    /// Queues a packet for the master; false if not connected.
    pub fn send(&self, packet: Packet) -> bool {
        if !self.is_connected() {
            debug!("Dropping {} while {:?}", packet.name(), self.state());
            return false;
        }
        self.send_unchecked(packet)
    }

    /// Queues a packet on the current connection regardless of auth state.
    pub(crate) fn send_unchecked(&self, packet: Packet) -> bool {
        match self.link.sender.lock().as_ref() {
            Some(sender) => sender.send(packet).is_ok(),
            None => false,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.link.latency_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn set_latency_ms(&self, latency_ms: u64) {
        self.link.latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn events(&self) -> &EventBus {
        &self.link.events
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("state", &self.state())
            .field("latency_ms", &self.latency_ms())
            .finish()
    }
}
