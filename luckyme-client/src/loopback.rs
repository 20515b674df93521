//! In-process stand-in for the dissemination daemon.
//!
//! Used to host the service without a daemon binary and to drive tests. It
//! keeps per-session interests and published objects, answers the query
//! commands with events, and records everything it was asked to do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use luckyme_core::{Attribute, ClientError, DaemonStatus, DataObject, Event, SessionId};

use crate::dispatcher::EventSink;
use crate::lifecycle::DaemonControl;
use crate::link::{Command, DaemonLink};

static NEXT_LOOPBACK: AtomicU64 = AtomicU64::new(1);

struct LoopbackState {
    names: HashMap<String, SessionId>,
    sinks: HashMap<SessionId, EventSink>,
    interests: HashMap<SessionId, Vec<Attribute>>,
    objects: Vec<DataObject>,
    commands: Vec<(SessionId, Command)>,
    status: DaemonStatus,
    spawn_succeeds: bool,
    echo_publishes: bool,
    unregister: UnregisterMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnregisterMode {
    Forget,
    /// Acknowledge but keep the name, like a daemon that lost the request.
    KeepName,
    Reject,
}

pub struct LoopbackDaemon {
    endpoint: String,
    state: Mutex<LoopbackState>,
    next_id: AtomicU64,
    releases: AtomicUsize,
    unregisters: AtomicUsize,
    spawns: AtomicUsize,
}

impl Default for LoopbackDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDaemon {
    /// A daemon that is already running.
    pub fn new() -> Self {
        Self {
            endpoint: format!("loopback:{}", NEXT_LOOPBACK.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(LoopbackState {
                names: HashMap::new(),
                sinks: HashMap::new(),
                interests: HashMap::new(),
                objects: Vec::new(),
                commands: Vec::new(),
                status: DaemonStatus::Running,
                spawn_succeeds: true,
                echo_publishes: false,
                unregister: UnregisterMode::Forget,
            }),
            next_id: AtomicU64::new(1),
            releases: AtomicUsize::new(0),
            unregisters: AtomicUsize::new(0),
            spawns: AtomicUsize::new(0),
        }
    }

    pub fn with_status(self, status: DaemonStatus) -> Self {
        self.state.lock().status = status;
        self
    }

    /// Make every `spawn` fail without changing the status.
    pub fn fail_spawns(self) -> Self {
        self.state.lock().spawn_succeeds = false;
        self
    }

    /// Deliver each published object back to every attached session.
    pub fn echo_publishes(self) -> Self {
        self.state.lock().echo_publishes = true;
        self
    }

    /// Answer `unregister` with success but leave the name taken.
    pub fn keep_names_on_unregister(self) -> Self {
        self.state.lock().unregister = UnregisterMode::KeepName;
        self
    }

    /// Fail every `unregister`.
    pub fn reject_unregister(self) -> Self {
        self.state.lock().unregister = UnregisterMode::Reject;
        self
    }

    pub fn set_status(&self, status: DaemonStatus) {
        self.state.lock().status = status;
    }

    /// Pretend a daemon-side session called `name` survived from an earlier run.
    pub fn preregister(&self, name: &str) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.state.lock().names.insert(name.to_string(), id);
        id
    }

    /// Push `event` to one session.
    pub fn emit(&self, session: SessionId, event: Event) -> Result<(), ClientError> {
        let state = self.state.lock();
        let sink = state
            .sinks
            .get(&session)
            .ok_or_else(|| ClientError::Protocol(format!("session {session} is not attached")))?;
        sink.deliver(event)
    }

    /// Push `event` to every attached session. Returns how many received it.
    pub fn broadcast(&self, event: Event) -> usize {
        let state = self.state.lock();
        broadcast_locked(&state, &event)
    }

    pub fn commands(&self) -> Vec<(SessionId, Command)> {
        self.state.lock().commands.clone()
    }

    pub fn published(&self) -> Vec<DataObject> {
        self.state.lock().objects.clone()
    }

    pub fn interests(&self, session: SessionId) -> Vec<Attribute> {
        self.state
            .lock()
            .interests
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_id(&self, name: &str) -> Option<SessionId> {
        self.state.lock().names.get(name).copied()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn unregister_count(&self) -> usize {
        self.unregisters.load(Ordering::SeqCst)
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

fn broadcast_locked(state: &LoopbackState, event: &Event) -> usize {
    state
        .sinks
        .values()
        .filter(|sink| sink.deliver(event.clone()).is_ok())
        .count()
}

fn same_interest(a: &Attribute, b: &Attribute) -> bool {
    a.name == b.name && a.value == b.value
}

impl DaemonLink for LoopbackDaemon {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn register(&self, name: &str) -> Result<SessionId, ClientError> {
        let mut state = self.state.lock();
        if state.status != DaemonStatus::Running {
            return Err(ClientError::RegistrationFailed {
                name: name.to_string(),
                reason: format!("daemon is {}", state.status),
            });
        }
        if state.names.contains_key(name) {
            return Err(ClientError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        state.names.insert(name.to_string(), id);
        Ok(id)
    }

    fn unregister(&self, name: &str) -> Result<(), ClientError> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        match state.unregister {
            UnregisterMode::Reject => {
                return Err(ClientError::Protocol(format!("cannot unregister '{name}'")));
            }
            UnregisterMode::KeepName => return Ok(()),
            UnregisterMode::Forget => {}
        }
        if let Some(id) = state.names.remove(name) {
            state.sinks.remove(&id);
            state.interests.remove(&id);
        }
        Ok(())
    }

    fn send(&self, session: SessionId, command: Command) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if !state.names.values().any(|id| *id == session) {
            return Err(ClientError::Protocol(format!("unknown session {session}")));
        }
        state.commands.push((session, command.clone()));

        match command {
            Command::RegisterEventInterest { .. } => {}
            Command::Publish { object } => {
                state.objects.push(object.clone());
                if state.echo_publishes {
                    broadcast_locked(&state, &Event::NewDataObject { object });
                }
            }
            Command::Delete { object } => state.objects.retain(|o| *o != object),
            Command::RegisterInterests { interests } => {
                let current = state.interests.entry(session).or_default();
                for interest in interests {
                    current.retain(|existing| !same_interest(existing, &interest));
                    current.push(interest);
                }
            }
            Command::RemoveInterests { interests } => {
                if let Some(current) = state.interests.get_mut(&session) {
                    current.retain(|existing| !interests.iter().any(|i| same_interest(existing, i)));
                }
            }
            Command::GetApplicationInterests => {
                let interests = state.interests.get(&session).cloned().unwrap_or_default();
                if let Some(sink) = state.sinks.get(&session) {
                    sink.deliver(Event::InterestListUpdate { interests })?;
                }
            }
            Command::GetDataObjects => {
                if let Some(sink) = state.sinks.get(&session) {
                    for object in &state.objects {
                        sink.deliver(Event::NewDataObject {
                            object: object.clone(),
                        })?;
                    }
                }
            }
            Command::Shutdown => {
                state.status = DaemonStatus::NotRunning;
                broadcast_locked(&state, &Event::Shutdown { reason: 0 });
            }
        }
        Ok(())
    }

    fn attach(&self, session: SessionId, sink: EventSink) -> Result<(), ClientError> {
        self.state.lock().sinks.insert(session, sink);
        Ok(())
    }

    fn release(&self, session: SessionId) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.sinks.remove(&session);
        state.names.retain(|_, id| *id != session);
    }
}

impl DaemonControl for LoopbackDaemon {
    fn status(&self) -> DaemonStatus {
        self.state.lock().status
    }

    fn spawn(&self, on_progress: &mut dyn FnMut(u64) -> i32) -> bool {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if on_progress(0) < 0 {
            return false;
        }
        let mut state = self.state.lock();
        if state.spawn_succeeds {
            state.status = DaemonStatus::Running;
        }
        state.status == DaemonStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interests_are_replaced_and_removed_by_name_and_value() {
        let daemon = LoopbackDaemon::new();
        let id = daemon.register("app").unwrap();
        daemon
            .send(
                id,
                Command::RegisterInterests {
                    interests: vec![Attribute::weighted("LuckyMe", "1", 5), Attribute::new("LuckyMe", "2")],
                },
            )
            .unwrap();
        daemon
            .send(
                id,
                Command::RegisterInterests {
                    interests: vec![Attribute::weighted("LuckyMe", "1", 9)],
                },
            )
            .unwrap();
        let interests = daemon.interests(id);
        assert_eq!(interests.len(), 2);
        assert!(interests.contains(&Attribute::weighted("LuckyMe", "1", 9)));

        daemon
            .send(
                id,
                Command::RemoveInterests {
                    interests: vec![Attribute::new("LuckyMe", "2")],
                },
            )
            .unwrap();
        assert_eq!(daemon.interests(id), vec![Attribute::weighted("LuckyMe", "1", 9)]);
    }

    #[test]
    fn release_frees_the_name() {
        let daemon = LoopbackDaemon::new();
        let id = daemon.register("app").unwrap();
        assert!(matches!(
            daemon.register("app"),
            Err(ClientError::AlreadyRegistered { .. })
        ));
        daemon.release(id);
        assert!(daemon.register("app").is_ok());
        assert_eq!(daemon.release_count(), 1);
    }

    #[test]
    fn each_daemon_is_its_own_endpoint() {
        let a = LoopbackDaemon::new();
        let b = LoopbackDaemon::new();
        assert_ne!(a.endpoint(), b.endpoint());
        assert_eq!(a.endpoint(), a.endpoint());
    }

    #[test]
    fn commands_for_unknown_sessions_are_rejected() {
        let daemon = LoopbackDaemon::new();
        assert!(daemon.send(SessionId(42), Command::GetDataObjects).is_err());
    }
}
