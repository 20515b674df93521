//! Relays service state to a bound consumer without blocking the sender.

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use luckyme_core::{ClientMessage, Node};

/// Latest known service state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub running: bool,
    pub neighbors: Vec<Node>,
    pub objects_sent: u64,
    pub objects_received: u64,
}

#[derive(Default)]
pub struct ClientNotifier {
    sink: Mutex<Option<UnboundedSender<ClientMessage>>>,
    state: Mutex<ServiceSnapshot>,
}

impl ClientNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any previously bound consumer.
    pub fn bind(&self, sink: UnboundedSender<ClientMessage>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn unbind(&self) {
        *self.sink.lock() = None;
    }

    pub fn is_bound(&self) -> bool {
        self.sink.lock().as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Deliver `message` if a consumer is bound. Returns whether it was sent.
    /// A consumer that went away is unbound.
    pub fn notify(&self, message: ClientMessage) -> bool {
        let mut sink = self.sink.lock();
        let Some(tx) = sink.as_ref() else {
            return false;
        };
        if tx.send(message).is_ok() {
            true
        } else {
            tracing::debug!("client message consumer is gone, unbinding");
            *sink = None;
            false
        }
    }

    /// Re-send the current state: running flag, neighbors, then counters.
    pub fn request_all_updates(&self) {
        let snapshot = self.snapshot();
        let running = if snapshot.running {
            ClientMessage::ServiceStarted
        } else {
            ClientMessage::ServiceStopped
        };
        for message in [
            running,
            ClientMessage::NeighborUpdate,
            ClientMessage::ObjectsSent(snapshot.objects_sent),
            ClientMessage::ObjectsReceived(snapshot.objects_received),
        ] {
            self.notify(message);
        }
    }

    pub fn set_running(&self, running: bool) {
        self.state.lock().running = running;
        self.notify(if running {
            ClientMessage::ServiceStarted
        } else {
            ClientMessage::ServiceStopped
        });
    }

    pub fn record_neighbors(&self, neighbors: Vec<Node>) {
        self.state.lock().neighbors = neighbors;
        self.notify(ClientMessage::NeighborUpdate);
    }

    pub fn record_sent(&self) -> u64 {
        let count = {
            let mut state = self.state.lock();
            state.objects_sent += 1;
            state.objects_sent
        };
        self.notify(ClientMessage::ObjectsSent(count));
        count
    }

    pub fn record_received(&self) -> u64 {
        let count = {
            let mut state = self.state.lock();
            state.objects_received += 1;
            state.objects_received
        };
        self.notify(ClientMessage::ObjectsReceived(count));
        count
    }

    pub fn neighbors(&self) -> Vec<Node> {
        self.state.lock().neighbors.clone()
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        self.state.lock().clone()
    }
}
