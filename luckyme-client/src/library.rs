//! Process-wide entry point: owns the daemon link and tracks which session
//! names are live in this process.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use luckyme_core::ClientError;

use crate::link::DaemonLink;
use crate::session::SessionHandle;

static REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

/// Session names live in this process, per daemon endpoint.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    names: Mutex<BTreeSet<(String, String)>>,
}

impl SessionRegistry {
    /// The registry shared by every [`ClientLibrary`] in the process.
    pub fn global() -> &'static SessionRegistry {
        REGISTRY.get_or_init(SessionRegistry::default)
    }

    /// Reserve `name` on `endpoint`. Returns `false` if it is already live.
    pub fn claim(&self, endpoint: &str, name: &str) -> bool {
        self.names
            .lock()
            .insert((endpoint.to_string(), name.to_string()))
    }

    pub fn release(&self, endpoint: &str, name: &str) -> bool {
        self.names
            .lock()
            .remove(&(endpoint.to_string(), name.to_string()))
    }

    pub fn contains(&self, endpoint: &str, name: &str) -> bool {
        self.names
            .lock()
            .contains(&(endpoint.to_string(), name.to_string()))
    }

    /// Live names on `endpoint`, sorted.
    pub fn live(&self, endpoint: &str) -> Vec<String> {
        self.names
            .lock()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// Explicitly initialised client library. Hosting processes create one and
/// keep it for as long as sessions may be registered.
///
/// Every library in the process shares one [`SessionRegistry`], so a name
/// live through one library is also live for any other library that talks
/// to the same daemon.
pub struct ClientLibrary {
    link: Arc<dyn DaemonLink>,
    endpoint: String,
    registry: &'static SessionRegistry,
}

impl ClientLibrary {
    pub fn init(link: Arc<dyn DaemonLink>) -> Self {
        let endpoint = link.endpoint();
        tracing::debug!(%endpoint, "client library initialised");
        Self {
            link,
            endpoint,
            registry: SessionRegistry::global(),
        }
    }

    pub fn link(&self) -> Arc<dyn DaemonLink> {
        self.link.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Names live on this library's daemon, through any library.
    pub fn live_sessions(&self) -> Vec<String> {
        self.registry.live(&self.endpoint)
    }

    /// Register a named session with the daemon.
    ///
    /// Fails with [`ClientError::AlreadyRegistered`] when the name is live in
    /// this process or the daemon still holds a session under it.
    pub fn register(&self, name: &str) -> Result<SessionHandle, ClientError> {
        if !self.registry.claim(&self.endpoint, name) {
            return Err(ClientError::AlreadyRegistered {
                name: name.to_string(),
            });
        }

        match self.link.register(name) {
            Ok(id) => {
                tracing::info!(session = %name, id = %id, "session registered");
                Ok(SessionHandle::new(
                    name.to_string(),
                    id,
                    self.link.clone(),
                    self.endpoint.clone(),
                    self.registry,
                ))
            }
            Err(err) => {
                self.registry.release(&self.endpoint, name);
                Err(err)
            }
        }
    }

    /// Register, and on `AlreadyRegistered` from the daemon unregister the
    /// stale session and try exactly once more.
    ///
    /// A name that is live in this process is never unregistered behind its
    /// owner's back. The second failure, if any, is returned as is.
    pub fn register_with_retry(&self, name: &str) -> Result<SessionHandle, ClientError> {
        match self.register(name) {
            Err(ClientError::AlreadyRegistered { .. })
                if !self.registry.contains(&self.endpoint, name) =>
            {
                tracing::warn!(session = %name, "stale daemon session, unregistering and retrying");
                self.link.unregister(name)?;
                self.register(name)
            }
            other => other,
        }
    }

    pub fn unregister(&self, name: &str) -> Result<(), ClientError> {
        self.link.unregister(name)
    }
}

impl Drop for ClientLibrary {
    fn drop(&mut self) {
        let live = self.live_sessions();
        if live.is_empty() {
            tracing::debug!("client library torn down");
        } else {
            tracing::warn!(sessions = ?live, "client library torn down with live sessions");
        }
    }
}

/// Install the default `fmt` subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_claims_each_name_once_per_endpoint() {
        let registry = SessionRegistry::default();
        assert!(registry.claim("d1", "a"));
        assert!(!registry.claim("d1", "a"));
        assert!(registry.claim("d1", "b"));
        assert!(registry.claim("d2", "a"));
        assert_eq!(registry.live("d1"), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.live("d2"), vec!["a".to_string()]);
        assert!(registry.release("d1", "a"));
        assert!(!registry.release("d1", "a"));
        assert!(!registry.contains("d1", "a"));
        assert!(registry.contains("d2", "a"));
    }

    #[test]
    fn init_tracing_twice_is_harmless() {
        init_tracing();
        init_tracing();
        tracing::info!("subscriber installed");
    }

    #[test]
    fn global_registry_is_shared() {
        assert!(std::ptr::eq(SessionRegistry::global(), SessionRegistry::global()));
    }
}
