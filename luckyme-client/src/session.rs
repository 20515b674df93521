//! A registered, named session with the daemon.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use luckyme_core::{Attribute, ClientError, DataObject, Event, EventKind, SessionId};

use crate::dispatcher::{EventDispatcher, EventHandler, HandlerTable};
use crate::library::SessionRegistry;
use crate::link::{Command, DaemonLink};

/// Handle for one live session. Created by
/// [`ClientLibrary::register`](crate::ClientLibrary::register).
///
/// Every operation except [`dispose`](Self::dispose) fails with
/// [`ClientError::Disposed`] once the handle has been disposed. Dropping the
/// handle disposes it.
pub struct SessionHandle {
    name: String,
    id: SessionId,
    link: Arc<dyn DaemonLink>,
    endpoint: String,
    registry: &'static SessionRegistry,
    handlers: Arc<HandlerTable>,
    dispatcher: EventDispatcher,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        name: String,
        id: SessionId,
        link: Arc<dyn DaemonLink>,
        endpoint: String,
        registry: &'static SessionRegistry,
    ) -> Self {
        let handlers = Arc::new(HandlerTable::default());
        let dispatcher = EventDispatcher::new(name.clone(), handlers.clone());
        Self {
            name,
            id,
            link,
            endpoint,
            registry,
            handlers,
            dispatcher,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> Result<SessionId, ClientError> {
        self.ensure_live()?;
        Ok(self.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Install `handler` for `kind`. A later registration for the same kind
    /// replaces the earlier one; the daemon is only told about the first.
    pub fn register_event_interest<F>(&self, kind: EventKind, handler: F) -> Result<(), ClientError>
    where
        F: Fn(&Event) -> Result<(), ClientError> + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let handler: EventHandler = Arc::new(handler);
        if self.handlers.insert(kind, handler) {
            tracing::debug!(session = %self.name, event = %kind, "event handler replaced");
            return Ok(());
        }
        self.send(Command::RegisterEventInterest { kind })
    }

    pub fn publish(&self, object: &DataObject) -> Result<(), ClientError> {
        self.send(Command::Publish {
            object: object.clone(),
        })
    }

    pub fn delete(&self, object: &DataObject) -> Result<(), ClientError> {
        self.send(Command::Delete {
            object: object.clone(),
        })
    }

    pub fn register_interests(&self, interests: &[Attribute]) -> Result<(), ClientError> {
        self.send(Command::RegisterInterests {
            interests: interests.to_vec(),
        })
    }

    pub fn remove_interests(&self, interests: &[Attribute]) -> Result<(), ClientError> {
        self.send(Command::RemoveInterests {
            interests: interests.to_vec(),
        })
    }

    /// The answer arrives as an [`Event::InterestListUpdate`].
    pub fn get_application_interests_async(&self) -> Result<(), ClientError> {
        self.send(Command::GetApplicationInterests)
    }

    /// Matching objects arrive as [`Event::NewDataObject`] events.
    pub fn get_data_objects_async(&self) -> Result<(), ClientError> {
        self.send(Command::GetDataObjects)
    }

    /// Ask the daemon to shut down.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }

    /// Attach the session's event queue to the link and start dispatching.
    pub fn run_event_loop(&self) -> Result<(), ClientError> {
        self.ensure_live()?;
        if self.handlers.is_empty() {
            return Err(ClientError::NoEventHandlers {
                name: self.name.clone(),
            });
        }
        self.link.attach(self.id, self.dispatcher.sink())?;
        self.dispatcher.start()
    }

    pub fn stop_event_loop(&self) -> Result<(), ClientError> {
        self.ensure_live()?;
        self.dispatcher.stop();
        Ok(())
    }

    pub fn is_event_loop_running(&self) -> Result<bool, ClientError> {
        self.ensure_live()?;
        Ok(self.dispatcher.is_running())
    }

    /// Stop the event loop and release the daemon session. Only the first
    /// call does any work; concurrent and repeated calls return immediately.
    pub fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.dispatcher.stop();
        self.link.release(self.id);
        self.registry.release(&self.endpoint, &self.name);
        tracing::info!(session = %self.name, "session disposed");
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.ensure_live()?;
        tracing::debug!(session = %self.name, op = command.label(), "sending command");
        self.link.send(self.id, command)
    }

    fn ensure_live(&self) -> Result<(), ClientError> {
        if self.is_disposed() {
            return Err(ClientError::Disposed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}
