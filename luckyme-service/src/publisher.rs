//! Periodic creation and publishing of data objects.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use luckyme_client::SessionHandle;
use luckyme_core::{Attribute, ClientError, DataObject, APP_ATTRIBUTE};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::notifier::ClientNotifier;

/// Bits of the object counter that become attributes in grid mode.
const GRID_ATTRIBUTE_BITS: u32 = 6;

/// Shortest publish period; shorter settings are raised to this.
pub const MIN_PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub interval: Duration,
    pub join_timeout: Duration,
    pub pool_size: u64,
    pub num_attributes: usize,
    pub grid: bool,
    pub data_file: Option<PathBuf>,
    pub seed: Option<u64>,
    pub single_source: Option<String>,
    pub host_name: String,
}

impl From<&ServiceConfig> for PublisherSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            interval: config.create_interval(),
            join_timeout: config.publisher_join_timeout(),
            pool_size: config.effective_pool_size(),
            num_attributes: config.num_dataobject_attributes,
            grid: config.grid_enabled(),
            data_file: config.data_file.clone(),
            seed: config.seed,
            single_source: config.single_source.clone(),
            host_name: config.resolved_host_name(),
        }
    }
}

impl PublisherSettings {
    /// Whether this host publishes at all in single-source mode.
    pub fn is_source(&self) -> bool {
        self.single_source
            .as_deref()
            .map_or(true, |source| source == self.host_name)
    }
}

/// `count` distinct values drawn uniformly from `[0, pool_size)`.
pub fn random_values(rng: &mut impl Rng, pool_size: u64, count: usize) -> Result<Vec<u64>, ClientError> {
    if count as u64 > pool_size {
        return Err(ClientError::ObjectConstructionFailed {
            reason: format!("cannot draw {count} distinct attributes from a pool of {pool_size}"),
        });
    }
    let mut seen = BTreeSet::new();
    let mut values = Vec::with_capacity(count);
    while values.len() < count {
        let value = rng.gen_range(0..pool_size);
        if seen.insert(value) {
            values.push(value);
        }
    }
    Ok(values)
}

/// Attribute values for the `counter`-th grid object: its set low bits.
pub fn grid_values(counter: u64) -> Vec<u64> {
    (0..GRID_ATTRIBUTE_BITS)
        .filter(|bit| (counter >> bit) & 1 == 1)
        .map(u64::from)
        .collect()
}

/// Builds the objects the publisher sends, one per cycle.
pub struct ObjectFactory {
    settings: PublisherSettings,
    rng: StdRng,
    created: u64,
}

impl ObjectFactory {
    pub fn new(settings: PublisherSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            rng,
            created: 0,
        }
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn next_object(&mut self) -> Result<DataObject, ClientError> {
        let values = if self.settings.grid {
            grid_values(self.created)
        } else {
            random_values(&mut self.rng, self.settings.pool_size, self.settings.num_attributes)?
        };

        let mut object = match &self.settings.data_file {
            Some(path) => DataObject::from_file(path)?,
            None => DataObject::new(),
        };
        for value in values {
            object.add_attribute(Attribute::new(APP_ATTRIBUTE, value.to_string()));
        }
        self.created += 1;
        Ok(object)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Running,
    /// Terminal.
    Joined,
}

pub struct BackgroundPublisher {
    settings: PublisherSettings,
    session: Arc<SessionHandle>,
    notifier: Arc<ClientNotifier>,
    state: Mutex<PublisherState>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: broadcast::Sender<()>,
}

impl BackgroundPublisher {
    pub fn new(
        mut settings: PublisherSettings,
        session: Arc<SessionHandle>,
        notifier: Arc<ClientNotifier>,
    ) -> Self {
        if settings.interval < MIN_PUBLISH_INTERVAL {
            tracing::warn!(
                interval_ms = settings.interval.as_millis() as u64,
                "publish interval too short, using the minimum"
            );
            settings.interval = MIN_PUBLISH_INTERVAL;
        }
        let (shutdown, _) = broadcast::channel(1);
        Self {
            settings,
            session,
            notifier,
            state: Mutex::new(PublisherState::Idle),
            task: Mutex::new(None),
            shutdown,
        }
    }

    pub fn state(&self) -> PublisherState {
        *self.state.lock()
    }

    /// Spawn the publish loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        if *state != PublisherState::Idle {
            return Err(ServiceError::Task(format!(
                "publisher cannot start from state {:?}",
                *state
            )));
        }

        let factory = ObjectFactory::new(self.settings.clone());
        let handle = tokio::spawn(publish_loop(
            factory,
            self.settings.interval,
            self.session.clone(),
            self.notifier.clone(),
            self.shutdown.subscribe(),
        ));
        *self.task.lock() = Some(handle);
        *state = PublisherState::Running;
        tracing::info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "publisher started"
        );
        Ok(())
    }

    /// Signal the loop and wait for it, at most the configured join timeout.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == PublisherState::Joined {
                return;
            }
            *state = PublisherState::Joined;
        }
        let _ = self.shutdown.send(());

        let Some(mut handle) = self.task.lock().take() else {
            return;
        };
        match tokio::time::timeout(self.settings.join_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::info!("publisher stopped"),
            Ok(Err(err)) => tracing::error!(error = %err, "publisher task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.settings.join_timeout.as_secs(),
                    "publisher did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }
}

impl Drop for BackgroundPublisher {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn publish_loop(
    mut factory: ObjectFactory,
    period: Duration,
    session: Arc<SessionHandle>,
    notifier: Arc<ClientNotifier>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let session = session.clone();
                let notifier = notifier.clone();
                let cycle = tokio::task::spawn_blocking(move || {
                    publish_once(&mut factory, &session, &notifier);
                    factory
                });
                factory = match cycle.await {
                    Ok(factory) => factory,
                    Err(err) => {
                        tracing::error!(error = %err, "publish cycle failed, publisher exiting");
                        break;
                    }
                };
            }
        }
    }
}

fn publish_once(factory: &mut ObjectFactory, session: &SessionHandle, notifier: &ClientNotifier) {
    if !factory.settings.is_source() {
        tracing::debug!(host = %factory.settings.host_name, "not the single source, skipping publish");
        return;
    }

    let object = match factory.next_object() {
        Ok(object) => object,
        Err(err) => {
            tracing::warn!(error = %err, "skipping publish cycle");
            return;
        }
    };
    match session.publish(&object) {
        Ok(()) => {
            let sent = notifier.record_sent();
            tracing::debug!(sent, attributes = object.attributes.len(), "data object published");
        }
        Err(err) => tracing::warn!(error = %err, "publish failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;

    use luckyme_client::{ClientLibrary, Command, DaemonLink, EventSink, LoopbackDaemon};
    use luckyme_core::SessionId;

    fn settings() -> PublisherSettings {
        PublisherSettings {
            interval: Duration::from_secs(10),
            join_timeout: Duration::from_secs(1),
            pool_size: 100,
            num_attributes: 3,
            grid: false,
            data_file: None,
            seed: Some(7),
            single_source: None,
            host_name: "node-1".to_string(),
        }
    }

    #[test]
    fn random_values_are_distinct_and_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let values = random_values(&mut rng, 10, 10).unwrap();
            let distinct: BTreeSet<_> = values.iter().copied().collect();
            assert_eq!(distinct.len(), 10);
            assert!(values.iter().all(|v| *v < 10));
        }
    }

    #[test]
    fn too_many_attributes_for_the_pool_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            random_values(&mut rng, 2, 3),
            Err(ClientError::ObjectConstructionFailed { .. })
        ));
        assert!(random_values(&mut rng, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn grid_values_are_the_set_bits() {
        assert!(grid_values(0).is_empty());
        assert_eq!(grid_values(5), vec![0, 2]);
        assert_eq!(grid_values(63), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(grid_values(64), Vec::<u64>::new());
    }

    #[test]
    fn seeded_factories_repeat() {
        let mut a = ObjectFactory::new(settings());
        let mut b = ObjectFactory::new(settings());
        for _ in 0..5 {
            assert_eq!(a.next_object().unwrap().attributes, b.next_object().unwrap().attributes);
        }
        assert_eq!(a.created(), 5);
    }

    #[test]
    fn unreadable_data_file_fails_the_cycle() {
        let mut factory = ObjectFactory::new(PublisherSettings {
            data_file: Some(PathBuf::from("/definitely/not/here.jpg")),
            ..settings()
        });
        assert!(matches!(
            factory.next_object(),
            Err(ClientError::ObjectConstructionFailed { .. })
        ));
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn single_source_only_publishes_on_the_named_host() {
        let mut s = settings();
        assert!(s.is_source());
        s.single_source = Some("node-2".to_string());
        assert!(!s.is_source());
        s.host_name = "node-2".to_string();
        assert!(s.is_source());
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_per_interval_until_stopped() {
        let daemon = Arc::new(LoopbackDaemon::new());
        let library = ClientLibrary::init(daemon.clone());
        let session = Arc::new(library.register("publisher").unwrap());
        let notifier = Arc::new(ClientNotifier::new());

        let publisher = BackgroundPublisher::new(settings(), session.clone(), notifier.clone());
        publisher.start().unwrap();
        assert!(publisher.start().is_err());

        tokio::time::sleep(Duration::from_secs(35)).await;
        publisher.stop().await;
        assert_eq!(publisher.state(), PublisherState::Joined);

        let published = daemon.published();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|o| o.attributes.len() == 3));
        assert_eq!(notifier.snapshot().objects_sent, 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(daemon.published().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_the_minimum() {
        let daemon = Arc::new(LoopbackDaemon::new());
        let library = ClientLibrary::init(daemon.clone());
        let session = Arc::new(library.register("eager").unwrap());
        let settings = PublisherSettings {
            interval: Duration::ZERO,
            ..settings()
        };

        let publisher = BackgroundPublisher::new(settings, session, Arc::new(ClientNotifier::new()));
        publisher.start().unwrap();
        tokio::time::sleep(MIN_PUBLISH_INTERVAL * 3 + MIN_PUBLISH_INTERVAL / 2).await;
        publisher.stop().await;
        assert_eq!(daemon.published().len(), 3);
    }

    /// Link whose publishes wait for the test to open a gate.
    struct GatedLink {
        inner: LoopbackDaemon,
        gate: Mutex<std_mpsc::Receiver<()>>,
        starved: AtomicBool,
    }

    impl DaemonLink for GatedLink {
        fn endpoint(&self) -> String {
            self.inner.endpoint()
        }

        fn register(&self, name: &str) -> Result<SessionId, ClientError> {
            self.inner.register(name)
        }

        fn unregister(&self, name: &str) -> Result<(), ClientError> {
            self.inner.unregister(name)
        }

        fn send(&self, session: SessionId, command: Command) -> Result<(), ClientError> {
            if matches!(command, Command::Publish { .. }) {
                let waited = self.gate.lock().recv_timeout(Duration::from_secs(5));
                if let Err(std_mpsc::RecvTimeoutError::Timeout) = waited {
                    self.starved.store(true, Ordering::SeqCst);
                }
            }
            self.inner.send(session, command)
        }

        fn attach(&self, session: SessionId, sink: EventSink) -> Result<(), ClientError> {
            self.inner.attach(session, sink)
        }

        fn release(&self, session: SessionId) {
            self.inner.release(session)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_publish_leaves_the_runtime_free() {
        let (open, gate) = std_mpsc::channel();
        let link = Arc::new(GatedLink {
            inner: LoopbackDaemon::new(),
            gate: Mutex::new(gate),
            starved: AtomicBool::new(false),
        });
        let library = ClientLibrary::init(link.clone());
        let session = Arc::new(library.register("gated").unwrap());
        let settings = PublisherSettings {
            interval: MIN_PUBLISH_INTERVAL,
            ..settings()
        };

        let publisher = BackgroundPublisher::new(settings, session, Arc::new(ClientNotifier::new()));
        publisher.start().unwrap();
        tokio::time::sleep(MIN_PUBLISH_INTERVAL * 3).await;
        open.send(()).unwrap();
        drop(open);
        publisher.stop().await;

        assert!(!link.starved.load(Ordering::SeqCst));
        assert!(!link.inner.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_start_is_terminal() {
        let daemon = Arc::new(LoopbackDaemon::new());
        let library = ClientLibrary::init(daemon.clone());
        let session = Arc::new(library.register("idle").unwrap());
        let publisher = BackgroundPublisher::new(settings(), session, Arc::new(ClientNotifier::new()));
        publisher.stop().await;
        assert!(publisher.start().is_err());
    }
}
