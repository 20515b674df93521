//! Serial event dispatch on a dedicated thread.
//!
//! The loop blocks on a queue fed by the transport through an [`EventSink`]
//! and invokes the handler registered for each event's kind, one event at a
//! time, in arrival order. `stop` wakes the loop with a message on the same
//! queue, so a blocked receive returns immediately.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use luckyme_core::{io_err, ClientError, Event, EventKind};

/// Callback invoked on the dispatcher thread for one event kind.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), ClientError> + Send + Sync>;

/// One active handler per event kind; the last registration wins.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<HashMap<EventKind, EventHandler>>,
}

impl HandlerTable {
    /// Install `handler` for `kind`, returning `true` if it replaced one.
    pub fn insert(&self, kind: EventKind, handler: EventHandler) -> bool {
        self.handlers.lock().insert(kind, handler).is_some()
    }

    pub fn get(&self, kind: EventKind) -> Option<EventHandler> {
        self.handlers.lock().get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

enum Inbound {
    Event(Event),
    Wake,
}

/// Producer side of a dispatcher queue, handed to the transport.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub fn deliver(&self, event: Event) -> Result<(), ClientError> {
        self.tx
            .send(Inbound::Event(event))
            .map_err(|_| ClientError::ChannelClosed("event queue"))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running,
    /// Terminal: a stopped dispatcher cannot be restarted.
    Stopped,
}

struct Inner {
    state: DispatcherState,
    rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    thread: Option<JoinHandle<()>>,
}

pub struct EventDispatcher {
    label: String,
    handlers: Arc<HandlerTable>,
    tx: mpsc::UnboundedSender<Inbound>,
    stopping: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

impl EventDispatcher {
    pub fn new(label: impl Into<String>, handlers: Arc<HandlerTable>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            label: label.into(),
            handlers,
            tx,
            stopping: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(Inner {
                state: DispatcherState::Idle,
                rx: Some(rx),
                thread: None,
            }),
        }
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    /// Spawn the loop thread. Fails unless the dispatcher is idle.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if inner.state != DispatcherState::Idle {
            return Err(ClientError::EventLoop(format!(
                "event loop for '{}' cannot start from state {:?}",
                self.label, inner.state
            )));
        }
        let rx = inner.rx.take().ok_or_else(|| {
            ClientError::EventLoop(format!("event queue for '{}' already consumed", self.label))
        })?;

        let label = self.label.clone();
        let handlers = self.handlers.clone();
        let stopping = self.stopping.clone();
        let thread = thread::Builder::new()
            .name(format!("luckyme-events-{}", self.label))
            .spawn(move || run_loop(&label, rx, &handlers, &stopping))
            .map_err(|e| io_err("event loop thread", e))?;

        inner.thread = Some(thread);
        inner.state = DispatcherState::Running;
        Ok(())
    }

    /// Stop the loop and wait for its thread to exit.
    ///
    /// Idempotent. When called from a handler running on the loop thread the
    /// loop exits after that handler returns and no join is attempted.
    pub fn stop(&self) {
        let thread = {
            let mut inner = self.inner.lock();
            match inner.state {
                DispatcherState::Stopped => return,
                DispatcherState::Idle => {
                    inner.state = DispatcherState::Stopped;
                    inner.rx = None;
                    return;
                }
                DispatcherState::Running => {}
            }
            inner.state = DispatcherState::Stopped;
            inner.thread.take()
        };

        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Inbound::Wake);

        let Some(thread) = thread else { return };
        if thread.thread().id() == thread::current().id() {
            tracing::debug!(session = %self.label, "event loop stop requested from a handler");
            return;
        }
        if thread.join().is_err() {
            tracing::error!(session = %self.label, "event loop thread panicked");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    label: &str,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    handlers: &HandlerTable,
    stopping: &AtomicBool,
) {
    tracing::info!(session = %label, "event loop started");
    while let Some(inbound) = rx.blocking_recv() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match inbound {
            Inbound::Wake => continue,
            Inbound::Event(event) => dispatch(label, handlers, &event),
        }
    }
    tracing::info!(session = %label, "event loop stopped");
}

fn dispatch(label: &str, handlers: &HandlerTable, event: &Event) {
    let kind = event.kind();
    let Some(handler) = handlers.get(kind) else {
        tracing::debug!(session = %label, event = %kind, "no handler registered, event dropped");
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => tracing::debug!(session = %label, event = %kind, "event handled"),
        Ok(Err(err)) => {
            tracing::warn!(session = %label, event = %kind, error = %err, "event handler failed")
        }
        Err(_) => tracing::error!(session = %label, event = %kind, "event handler panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use luckyme_core::{DataObject, Node};

    fn recording_handler(tx: std_mpsc::Sender<String>, tag: &'static str) -> EventHandler {
        let tx = Mutex::new(tx);
        Arc::new(move |event: &Event| {
            let label = match event {
                Event::NeighborUpdate { nodes } => format!("{tag}:neighbors:{}", nodes.len()),
                Event::NewDataObject { .. } => format!("{tag}:object"),
                other => format!("{tag}:{}", other.kind()),
            };
            let _ = tx.lock().send(label);
            Ok(())
        })
    }

    #[test]
    fn events_are_delivered_in_arrival_order() {
        let handlers = Arc::new(HandlerTable::default());
        let (tx, rx) = std_mpsc::channel();
        handlers.insert(EventKind::NeighborUpdate, recording_handler(tx.clone(), "h"));
        handlers.insert(EventKind::NewDataObject, recording_handler(tx, "h"));

        let dispatcher = EventDispatcher::new("order", handlers);
        let sink = dispatcher.sink();
        sink.deliver(Event::NeighborUpdate {
            nodes: vec![Node::new("a", "alpha")],
        })
        .unwrap();
        sink.deliver(Event::NewDataObject {
            object: DataObject::new(),
        })
        .unwrap();
        sink.deliver(Event::NeighborUpdate { nodes: vec![] }).unwrap();
        dispatcher.start().unwrap();

        let seen: Vec<String> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("event"))
            .collect();
        assert_eq!(seen, vec!["h:neighbors:1", "h:object", "h:neighbors:0"]);
        dispatcher.stop();
    }

    #[test]
    fn last_registration_wins() {
        let handlers = Arc::new(HandlerTable::default());
        let (tx, rx) = std_mpsc::channel();
        assert!(!handlers.insert(EventKind::Shutdown, recording_handler(tx.clone(), "first")));
        assert!(handlers.insert(EventKind::Shutdown, recording_handler(tx, "second")));

        let dispatcher = EventDispatcher::new("replace", handlers);
        dispatcher.start().unwrap();
        dispatcher.sink().deliver(Event::Shutdown { reason: 0 }).unwrap();

        let seen = rx.recv_timeout(Duration::from_secs(2)).expect("event");
        assert_eq!(seen, "second:shutdown");
        dispatcher.stop();
    }

    #[test]
    fn failing_handler_does_not_stop_the_loop() {
        let handlers = Arc::new(HandlerTable::default());
        let (tx, rx) = std_mpsc::channel();
        handlers.insert(
            EventKind::Shutdown,
            Arc::new(|_: &Event| Err(ClientError::handler("boom"))),
        );
        handlers.insert(
            EventKind::InterestListUpdate,
            Arc::new(|_: &Event| panic!("handler panic")),
        );
        handlers.insert(EventKind::NewDataObject, recording_handler(tx, "ok"));

        let dispatcher = EventDispatcher::new("isolation", handlers);
        dispatcher.start().unwrap();
        let sink = dispatcher.sink();
        sink.deliver(Event::Shutdown { reason: 1 }).unwrap();
        sink.deliver(Event::InterestListUpdate { interests: vec![] })
            .unwrap();
        sink.deliver(Event::NewDataObject {
            object: DataObject::new(),
        })
        .unwrap();

        let seen = rx.recv_timeout(Duration::from_secs(2)).expect("event");
        assert_eq!(seen, "ok:object");
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }

    #[test]
    fn stop_unblocks_an_idle_loop_and_is_terminal() {
        let dispatcher = EventDispatcher::new("stop", Arc::new(HandlerTable::default()));
        dispatcher.start().unwrap();
        dispatcher.stop();
        dispatcher.stop();
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(dispatcher.start().is_err());
        assert!(dispatcher.sink().deliver(Event::Shutdown { reason: 0 }).is_err());
    }

    #[test]
    fn stop_from_inside_a_handler_does_not_deadlock() {
        let handlers = Arc::new(HandlerTable::default());
        let dispatcher = Arc::new(EventDispatcher::new("reentrant", handlers.clone()));
        let (tx, rx) = std_mpsc::channel();

        let weak = Arc::downgrade(&dispatcher);
        let tx = Mutex::new(tx);
        handlers.insert(
            EventKind::Shutdown,
            Arc::new(move |_: &Event| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.stop();
                }
                let _ = tx.lock().send(());
                Ok(())
            }),
        );

        dispatcher.start().unwrap();
        dispatcher.sink().deliver(Event::Shutdown { reason: 0 }).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).expect("handler ran");
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }
}
