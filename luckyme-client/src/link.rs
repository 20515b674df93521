//! The daemon boundary every transport implements.

use serde::{Deserialize, Serialize};

use luckyme_core::{Attribute, ClientError, DataObject, EventKind, SessionId};

use crate::dispatcher::EventSink;

/// Fire-and-forget request a session sends to the daemon. Any answer arrives
/// later as an [`luckyme_core::Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    RegisterEventInterest { kind: EventKind },
    Publish { object: DataObject },
    Delete { object: DataObject },
    RegisterInterests { interests: Vec<Attribute> },
    RemoveInterests { interests: Vec<Attribute> },
    GetApplicationInterests,
    GetDataObjects,
    Shutdown,
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::RegisterEventInterest { .. } => "register_event_interest",
            Command::Publish { .. } => "publish",
            Command::Delete { .. } => "delete",
            Command::RegisterInterests { .. } => "register_interests",
            Command::RemoveInterests { .. } => "remove_interests",
            Command::GetApplicationInterests => "get_application_interests",
            Command::GetDataObjects => "get_data_objects",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Opaque RPC channel to the daemon.
///
/// `register` and `unregister` are request/response. `send` never waits for
/// the daemon to act. Events for a session are pushed into the [`EventSink`]
/// given to `attach`. `release` frees the session's resources and is called
/// at most once per session.
pub trait DaemonLink: Send + Sync {
    /// Identifies the daemon this link talks to. Links to the same daemon
    /// return the same value; session names are unique per endpoint.
    fn endpoint(&self) -> String;

    fn register(&self, name: &str) -> Result<SessionId, ClientError>;

    fn unregister(&self, name: &str) -> Result<(), ClientError>;

    fn send(&self, session: SessionId, command: Command) -> Result<(), ClientError>;

    fn attach(&self, session: SessionId, sink: EventSink) -> Result<(), ClientError>;

    fn release(&self, session: SessionId);
}
