//! The LuckyMe service: keeps the daemon up, holds one session, publishes
//! in the background, and relays what happens to a bound consumer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{thread_rng, Rng, SeedableRng};
use tokio::sync::Notify;

use luckyme_client::{
    backup_daemon_files, ensure_running, ClientLibrary, DaemonControl, DaemonLink, LaunchOutcome,
    LoopbackDaemon, SessionHandle,
};
use luckyme_core::{interest, Attribute, ClientError, Event, EventKind, InterestProfile, SessionId};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::notifier::ClientNotifier;
use crate::publisher::{BackgroundPublisher, PublisherSettings};

struct Running {
    session: Arc<SessionHandle>,
    publisher: BackgroundPublisher,
}

pub struct LuckyService {
    config: ServiceConfig,
    home: PathBuf,
    library: ClientLibrary,
    control: Arc<dyn DaemonControl>,
    notifier: Arc<ClientNotifier>,
    daemon_shutdown: Arc<Notify>,
    running: Mutex<Option<Running>>,
}

impl LuckyService {
    pub fn new(
        config: ServiceConfig,
        home: impl Into<PathBuf>,
        link: Arc<dyn DaemonLink>,
        control: Arc<dyn DaemonControl>,
    ) -> Self {
        Self {
            config,
            home: home.into(),
            library: ClientLibrary::init(link),
            control,
            notifier: Arc::new(ClientNotifier::new()),
            daemon_shutdown: Arc::new(Notify::new()),
            running: Mutex::new(None),
        }
    }

    /// Service backed by an in-process daemon.
    pub fn loopback(config: ServiceConfig, home: impl Into<PathBuf>, daemon: Arc<LoopbackDaemon>) -> Self {
        Self::new(config, home, daemon.clone(), daemon)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn notifier(&self) -> Arc<ClientNotifier> {
        self.notifier.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.running
            .lock()
            .as_ref()
            .and_then(|r| r.session.session_id().ok())
    }

    /// Resolves when the daemon reports that it is shutting down.
    pub async fn wait_for_daemon_shutdown(&self) {
        self.daemon_shutdown.notified().await;
    }

    /// Bring the daemon up, register the session, start its event loop and
    /// the publisher.
    ///
    /// On failure nothing stays running and `start` may be called again.
    pub async fn start(&self) -> Result<LaunchOutcome, ServiceError> {
        if self.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        let outcome = {
            let control = self.control.clone();
            let home = self.home.clone();
            tokio::task::spawn_blocking(move || {
                ensure_running(
                    control.as_ref(),
                    || {
                        if !backup_daemon_files(&home) {
                            tracing::warn!("some daemon files could not be backed up");
                        }
                    },
                    &mut |elapsed_ms| {
                        tracing::debug!(elapsed_ms, "waiting for daemon");
                        0
                    },
                )
            })
            .await
            .map_err(|e| ServiceError::Task(e.to_string()))??
        };

        let session = Arc::new(self.library.register_with_retry(&self.config.app_name)?);
        self.install_handlers(&session)?;
        session.run_event_loop()?;
        session.get_application_interests_async()?;

        let publisher = BackgroundPublisher::new(
            PublisherSettings::from(&self.config),
            session.clone(),
            self.notifier.clone(),
        );
        publisher.start()?;

        *self.running.lock() = Some(Running { session, publisher });
        self.notifier.set_running(true);
        tracing::info!(?outcome, app = %self.config.app_name, "service started");
        Ok(outcome)
    }

    /// Stop the publisher, then the event loop, then dispose the session.
    /// Returns `false` if the service was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };
        running.publisher.stop().await;

        // Joining the dispatcher thread blocks.
        let session = running.session.clone();
        let teardown = tokio::task::spawn_blocking(move || {
            if let Err(err) = session.stop_event_loop() {
                tracing::debug!(error = %err, "event loop already gone");
            }
            session.dispose();
        });
        if let Err(err) = teardown.await {
            tracing::error!(error = %err, "session teardown failed");
        }
        self.notifier.set_running(false);
        tracing::info!(app = %self.config.app_name, "service stopped");
        true
    }

    /// Ask the daemon to shut down through the live session.
    pub fn shutdown_daemon(&self) -> Result<(), ServiceError> {
        let running = self.running.lock();
        let session = running
            .as_ref()
            .map(|r| r.session.clone())
            .ok_or_else(|| ClientError::Daemon("service is not running".to_string()))?;
        drop(running);
        session.shutdown()?;
        Ok(())
    }

    fn install_handlers(&self, session: &Arc<SessionHandle>) -> Result<(), ClientError> {
        let notifier = self.notifier.clone();
        let shutdown = self.daemon_shutdown.clone();
        session.register_event_interest(EventKind::Shutdown, move |event| {
            if let Event::Shutdown { reason } = event {
                tracing::info!(reason, "daemon is shutting down");
            }
            notifier.set_running(false);
            shutdown.notify_one();
            Ok(())
        })?;

        let notifier = self.notifier.clone();
        session.register_event_interest(EventKind::NeighborUpdate, move |event| {
            if let Event::NeighborUpdate { nodes } = event {
                tracing::info!(neighbors = nodes.len(), "neighbor update");
                notifier.record_neighbors(nodes.clone());
            }
            Ok(())
        })?;

        let notifier = self.notifier.clone();
        session.register_event_interest(EventKind::NewDataObject, move |event| {
            if let Event::NewDataObject { object } = event {
                let received = notifier.record_received();
                tracing::debug!(received, attributes = object.attributes.len(), "data object received");
            }
            Ok(())
        })?;

        let weak: Weak<SessionHandle> = Arc::downgrade(session);
        let config = self.config.clone();
        session.register_event_interest(EventKind::InterestListUpdate, move |event| {
            let Event::InterestListUpdate { interests } = event else {
                return Ok(());
            };
            let session = weak
                .upgrade()
                .ok_or_else(|| ClientError::handler("session is gone"))?;
            on_interest_list(interests, &config, &session).map(|_| ())
        })
    }
}

impl Drop for LuckyService {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            tracing::warn!("service dropped while running, tearing down");
            drop(running.publisher);
            running.session.dispose();
        }
    }
}

/// Keep application interests the daemon already has; register a generated
/// profile only when the list is empty. Returns whether one was registered.
pub fn on_interest_list(
    interests: &[Attribute],
    config: &ServiceConfig,
    session: &SessionHandle,
) -> Result<bool, ClientError> {
    if !interests.is_empty() {
        for interest in interests {
            tracing::info!(%interest, "existing application interest");
        }
        return Ok(false);
    }

    let profile = interest_profile(config);
    if profile.is_empty() {
        tracing::warn!("generated interest profile is empty, nothing registered");
        return Ok(false);
    }
    tracing::info!(
        interests = profile.len(),
        total_weight = profile.total_weight(),
        "registering generated interests"
    );
    session.register_interests(&profile.into_attributes())?;
    Ok(true)
}

/// Grid interests in grid mode, otherwise a binomial profile around a random
/// (or seeded) luck value.
pub fn interest_profile(config: &ServiceConfig) -> InterestProfile {
    if config.grid_enabled() {
        return interest::grid(config.node_number, config.grid_size);
    }
    let pool = config.effective_pool_size();
    if pool == 0 {
        return InterestProfile::default();
    }
    let luck = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed).gen_range(0..pool),
        None => thread_rng().gen_range(0..pool),
    };
    tracing::debug!(luck, pool, "generating interests");
    interest::generate(luck, pool, config.interest_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_mode_uses_row_and_column() {
        let config = ServiceConfig {
            grid_size: 4,
            node_number: 6,
            ..ServiceConfig::default()
        };
        let profile = interest_profile(&config);
        assert_eq!(profile.ids(), vec![1, 6]);
        assert_eq!(profile.weights(), vec![1, 1]);
    }

    #[test]
    fn seeded_profiles_repeat() {
        let config = ServiceConfig {
            seed: Some(99),
            ..ServiceConfig::default()
        };
        let a = interest_profile(&config);
        assert_eq!(a, interest_profile(&config));
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn existing_interests_are_kept() {
        let daemon = Arc::new(LoopbackDaemon::new());
        let library = ClientLibrary::init(daemon.clone());
        let session = library.register("keep").unwrap();
        let config = ServiceConfig::default();

        let existing = vec![Attribute::weighted("LuckyMe", "12", 40)];
        assert!(!on_interest_list(&existing, &config, &session).unwrap());
        assert!(on_interest_list(&[], &config, &session).unwrap());

        let registered = daemon.interests(session.session_id().unwrap());
        assert_eq!(registered.len(), 6);
        assert!(registered.iter().all(|a| a.name == "LuckyMe"));
    }
}
