use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::time::Duration;

use fnv::FnvHashMap;
use futures::future::join_all;
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

use crate::mirrordb::{Backend, Error, Result};
use crate::mirrordb::balancer::Balancer;
use crate::mirrordb::cluster::{Connectors, StateStore};
use crate::mirrordb::config::ClusterSettings;
use crate::mirrordb::db::{Connection, DatabaseMetaData};
use crate::mirrordb::lock::{LockManager, GLOBAL_LOCK};
use crate::mirrordb::sync::{SyncContext, SyncStats, SyncStrategy};


/// A Cluster is a set of backend databases holding identical data.
///
/// Every backend is either active (a member of the balancer, eligible for reads and
/// receiving every write) or inactive. Backends are deactivated when they fail and
/// can't be reached, and re-activated after being synchronized from the primary.
/// Membership changes are persisted, so a restart resumes with the same active set.
pub struct Cluster {
    id: String,
    /// all configured backends, sorted by id
    backends: Vec<Backend>,
    balancer: Arc<dyn Balancer>,
    lock_manager: LockManager,
    strategies: BTreeMap<String, SyncStrategy>,
    default_sync: String,
    probe_query: String,
    probe_retries: u32,
    /// bumped every time a backend is activated, handles from an older generation are stale
    generations: FnvHashMap<String, AtomicU64>,
    metadata: Mutex<FnvHashMap<String, Arc<DatabaseMetaData>>>,
    state: StateStore,
    failure_detect_interval: Duration,
    auto_activate_interval: Duration,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    // keeps the channel open, so stop() is seen by receivers created after it
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Display, Debug, Clone, Copy)]
#[strum(serialize_all = "kebab-case")]
enum Schedule {
    FailureDetection,
    AutoActivation,
}

impl Cluster {
    pub fn new(settings: &ClusterSettings, connectors: &Connectors) -> Result<Arc<Self>> {
        let mut settings = settings.clone();
        settings.load(Path::new("."))?;

        let mut backends = Vec::with_capacity(settings.backends.len());
        for b in &settings.backends {
            let connector = connectors.get(&b.connector)?;
            backends.push(Backend::new(&b.id, b.weight, b.params.clone(), connector));
        }
        backends.sort();

        let mut strategies = BTreeMap::new();
        for s in &settings.sync_strategies {
            strategies.insert(s.id.clone(), SyncStrategy::new(&s.id, s.strategy.clone())?);
        }

        let generations = backends.iter()
            .map(|b| (b.id().to_string(), AtomicU64::new(0)))
            .collect();
        let state_file = settings.state_file.clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.state.yaml", settings.id)));
        let (shutdown, shutdown_rx) = watch::channel(false);

        Ok(Arc::new(Self {
            id: settings.id.clone(),
            backends,
            balancer: settings.balancer.create(),
            lock_manager: LockManager::new(settings.lock_timeout()),
            strategies,
            default_sync: settings.default_sync.clone(),
            probe_query: settings.probe_query.clone(),
            probe_retries: settings.probe_retries,
            generations,
            metadata: Mutex::new(FnvHashMap::default()),
            state: StateStore::new(state_file),
            failure_detect_interval: Duration::from_secs(settings.failure_detect_interval_seconds),
            auto_activate_interval: Duration::from_secs(settings.auto_activate_interval_seconds),
            started: AtomicBool::new(false),
            shutdown,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns every configured backend, ordered by id.
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend(&self, id: &str) -> Result<Backend> {
        self.backends.iter()
            .find(|b| b.id() == id)
            .cloned()
            .ok_or_else(|| Error::unknown_backend(id))
    }

    pub fn balancer(&self) -> &Arc<dyn Balancer> {
        &self.balancer
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn strategy(&self, id: &str) -> Result<&SyncStrategy> {
        self.strategies.get(id).ok_or_else(|| Error::unknown_strategy(id))
    }

    pub fn default_sync(&self) -> &str {
        &self.default_sync
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    /// Returns the active backends, ordered by id.
    pub fn active_backends(&self) -> Vec<Backend> {
        self.balancer.backends()
    }

    /// Returns the configured backends that are not active, ordered by id.
    pub fn inactive_backends(&self) -> Vec<Backend> {
        let active = self.balancer.backends();
        self.backends.iter()
            .filter(|b| active.binary_search(b).is_err())
            .cloned()
            .collect()
    }

    pub fn is_active(&self, backend: &Backend) -> bool {
        self.balancer.contains(backend)
    }

    pub(crate) fn generation(&self, backend: &Backend) -> u64 {
        self.generations.get(backend.id()).map(|g| g.load(Acquire)).unwrap_or(0)
    }

    /// Returns a receiver that changes to true when the cluster is stopped.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Start restores the persisted active set, or if there is none, activates every
    /// backend that responds to a probe. Then it starts the failure detection and
    /// auto-activation schedules, if configured.
    #[instrument(skip(self), fields(cluster = %self.id))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, AcqRel) {
            return Ok(());
        }
        let restored = match self.state.load().await {
            Ok(Some(ids)) if !ids.is_empty() => Some(ids),
            Ok(_) => None,
            Err(e) => {
                warn!(%e, path = %self.state.path().display(), "ignoring unreadable cluster state");
                None
            },
        };

        match restored {
            Some(ids) => {
                for id in ids {
                    match self.backend(&id) {
                        Ok(backend) => { self.balancer.add(backend); },
                        Err(_) => warn!(backend = %id, "ignoring unknown backend in persisted state"),
                    }
                }
            },
            None => {
                let probes = self.backends.iter().map(|b| async move { (b, self.is_alive(b).await) });
                for (backend, alive) in join_all(probes).await {
                    if alive {
                        self.balancer.add(backend.clone());
                    } else {
                        warn!(%backend, "backend is not reachable, leaving it inactive");
                    }
                }
            },
        }

        let active = self.active_backends();
        if active.is_empty() {
            warn!("no active backends");
        }
        info!(active = ?active, "cluster started");
        self.persist().await;
        self.spawn_schedules();
        Ok(())
    }

    /// Stop the background schedules and abort in-flight writes.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        info!(cluster = %self.id, "cluster stopped");
    }

    fn spawn_schedules(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (schedule, period) in [
            (Schedule::FailureDetection, self.failure_detect_interval),
            (Schedule::AutoActivation, self.auto_activate_interval),
        ] {
            if period.as_nanos() != 0 {
                debug!(cluster = %self.id, %schedule, ?period, "starting schedule");
                tasks.push(tokio::spawn(schedule_task(Arc::downgrade(self), schedule, period, self.shutdown_signal())));
            }
        }
    }

    /// Activate the backend with the given id, synchronizing it from the primary with
    /// the named strategy (or the default strategy). Returns false if the backend was
    /// already active.
    ///
    /// Activation holds the global write lock, so no writes are in flight while the
    /// backend is synchronized and added to the active set.
    #[instrument(skip(self), fields(cluster = %self.id))]
    pub async fn activate(&self, id: &str, strategy: Option<&str>) -> Result<bool> {
        let backend = self.backend(id)?;
        let strategy = self.strategy(strategy.unwrap_or(&self.default_sync))?;
        if self.balancer.contains(&backend) {
            return Ok(false);
        }

        let _lock = self.lock_manager.write_lock(GLOBAL_LOCK).await?;
        if self.balancer.contains(&backend) {
            return Ok(false);
        }
        if !self.is_alive(&backend).await {
            return Err(Error::backend(id, Error::new("backend is not reachable")));
        }

        match self.balancer.primary() {
            Some(source) => {
                if let Err(e) = self.synchronize(&source, &backend, strategy).await {
                    self.flush_metadata(&backend);
                    return Err(Error::synchronization(id, e));
                }
            },
            None => info!(%backend, "no active backends, activating without synchronization"),
        }

        if let Some(generation) = self.generations.get(backend.id()) {
            generation.fetch_add(1, AcqRel);
        }
        self.balancer.add(backend.clone());
        info!(%backend, strategy = %strategy.id(), "activated backend");
        self.persist().await;
        Ok(true)
    }

    /// Deactivate the backend with the given id. Returns false if it was already inactive.
    pub async fn deactivate(&self, id: &str) -> Result<bool> {
        let backend = self.backend(id)?;
        Ok(self.deactivate_backend(&backend).await)
    }

    pub(crate) async fn deactivate_backend(&self, backend: &Backend) -> bool {
        if !self.balancer.remove(backend) {
            return false;
        }
        warn!(cluster = %self.id, %backend, "deactivated backend");
        self.persist().await;
        true
    }

    /// Decide what a failed operation means for backend. If the backend still answers a
    /// probe it rejected the operation, and the error is returned wrapped with the backend id.
    /// Otherwise the backend has failed: it's deactivated and Ok is returned.
    pub async fn handle_failure(&self, backend: &Backend, error: Error) -> Result<()> {
        if self.is_alive(backend).await {
            debug!(cluster = %self.id, %backend, %error, "operation rejected by live backend");
            Err(Error::backend(backend.id(), error))
        } else {
            warn!(cluster = %self.id, %backend, %error, "backend failed and is not reachable");
            self.deactivate_backend(backend).await;
            Ok(())
        }
    }

    /// Probe backend with the configured probe query, retrying probe_retries times.
    pub async fn is_alive(&self, backend: &Backend) -> bool {
        for attempt in 0..=self.probe_retries {
            match self.probe(backend).await {
                Ok(()) => return true,
                Err(e) => debug!(cluster = %self.id, %backend, attempt, %e, "probe failed"),
            }
        }
        false
    }

    async fn probe(&self, backend: &Backend) -> Result<()> {
        let conn = backend.connect().await?;
        let result = conn.probe(&self.probe_query).await;
        close(backend, &*conn).await;
        result
    }

    async fn synchronize(&self, source: &Backend, target: &Backend, strategy: &SyncStrategy) -> Result<SyncStats> {
        let source_conn = source.connect().await?;
        let target_conn = match target.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                close(source, &*source_conn).await;
                return Err(e);
            },
        };
        let result = async {
            let ctx = SyncContext {
                source: source.clone(),
                target: target.clone(),
                source_metadata: self.metadata(source, &*source_conn).await?,
                target_metadata: self.metadata(target, &*target_conn).await?,
                source_conn: source_conn.clone(),
                target_conn: target_conn.clone(),
            };
            strategy.synchronize(&ctx).await
        }.await;
        close(source, &*source_conn).await;
        close(target, &*target_conn).await;
        result
    }

    /// Returns the cached metadata of backend, reading it with conn on a miss.
    pub async fn metadata(&self, backend: &Backend, conn: &dyn Connection) -> Result<Arc<DatabaseMetaData>> {
        if let Some(metadata) = self.metadata.lock()?.get(backend.id()) {
            return Ok(metadata.clone());
        }
        let metadata = Arc::new(conn.metadata().await?);
        self.metadata.lock()?.insert(backend.id().to_string(), metadata.clone());
        Ok(metadata)
    }

    fn flush_metadata(&self, backend: &Backend) {
        self.metadata.lock().unwrap_or_else(|e| e.into_inner()).remove(backend.id());
    }

    /// Discard all cached metadata, e.g. after a schema change.
    pub fn flush_metadata_cache(&self) {
        self.metadata.lock().unwrap_or_else(|e| e.into_inner()).clear();
        info!(cluster = %self.id, "flushed metadata cache");
    }

    async fn persist(&self) {
        let result = self.state.save(&self.id, || {
            self.balancer.backends().iter().map(|b| b.id().to_string()).collect()
        }).await;
        if let Err(e) = result {
            error!(cluster = %self.id, %e, path = %self.state.path().display(), "failed to persist cluster state");
        }
    }

    /// Deactivate every active backend that fails a probe.
    pub async fn detect_failures(&self) {
        for backend in self.active_backends() {
            if !self.is_alive(&backend).await {
                warn!(cluster = %self.id, %backend, "failure detected");
                self.deactivate_backend(&backend).await;
            }
        }
    }

    /// Try to activate every inactive backend that answers a probe.
    pub async fn activate_inactive(&self) {
        for backend in self.inactive_backends() {
            if !self.is_alive(&backend).await {
                continue;
            }
            if let Err(e) = self.activate(backend.id(), None).await {
                warn!(cluster = %self.id, %backend, %e, "auto-activation failed");
            }
        }
    }
}

async fn close(backend: &Backend, conn: &dyn Connection) {
    if let Err(e) = conn.close().await {
        debug!(%backend, %e, "error closing connection");
    }
}

async fn schedule_task(cluster: Weak<Cluster>, schedule: Schedule, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = interval(period);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = shutdown.changed() => break,
        }
        let cluster = match cluster.upgrade() {
            Some(cluster) => cluster,
            None => break,
        };
        match schedule {
            Schedule::FailureDetection => cluster.detect_failures().await,
            Schedule::AutoActivation => cluster.activate_inactive().await,
        }
    }
    debug!(%schedule, "schedule stopped");
}
