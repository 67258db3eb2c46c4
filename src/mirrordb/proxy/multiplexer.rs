use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::mirrordb::{Backend, Error, Result};
use crate::mirrordb::cluster::Cluster;


/// An operation run against the native handle of one backend.
pub type Operation<H, R> = Arc<dyn Fn(Backend, Arc<H>) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// Wrap an async closure as an Operation.
pub fn operation<H, R, F, Fut>(f: F) -> Operation<H, R>
    where H: ?Sized + Send + Sync + 'static,
          F: Fn(Backend, Arc<H>) -> Fut + Send + Sync + 'static,
          Fut: Future<Output=Result<R>> + Send + 'static
{
    Arc::new(move |backend, handle| Box::pin(f(backend, handle)))
}

/// Parent is a node in the handle tree that can supply the native handle of a backend
/// for its children to be created from.
pub trait Parent<H: ?Sized>: Send + Sync {
    fn cluster(&self) -> &Arc<Cluster>;

    /// Returns the native handle of backend, creating it if required.
    /// None means it could not be created and the backend was deactivated.
    fn native<'a>(&'a self, backend: &'a Backend) -> BoxFuture<'a, Option<Arc<H>>>;

    fn is_closed(&self) -> bool;
}

struct Slot<H: ?Sized> {
    /// the backend's activation generation when the handle was created
    generation: u64,
    handle: Arc<H>,
}

pub(crate) struct NodeState<H: ?Sized> {
    handles: BTreeMap<Backend, Slot<H>>,
    /// driver-level writes, replayed in order onto every newly created handle
    log: Vec<Operation<H, ()>>,
}

impl<H: ?Sized> NodeState<H> {
    /// Append op to the replay log.
    pub(crate) fn record(&mut self, op: Operation<H, ()>) {
        self.log.push(op);
    }
}

/// Multiplexer is one node of the proxy handle tree: a single client-facing handle
/// backed by one native handle (H) per active backend. Native handles are created
/// lazily from the parent's native handle (P) for the same backend.
///
/// Writes that configure the native handles are recorded and replayed onto handles
/// created later, so a backend activated after this node was created gets a handle
/// configured the same as the others.
pub struct Multiplexer<P: ?Sized, H: ?Sized> {
    cluster: Arc<Cluster>,
    parent: Arc<dyn Parent<P>>,
    create: Operation<P, Arc<H>>,
    close: Operation<H, ()>,
    state: Mutex<NodeState<H>>,
    closed: AtomicBool,
}

impl<P, H> Multiplexer<P, H>
    where P: ?Sized + Send + Sync + 'static,
          H: ?Sized + Send + Sync + 'static
{
    /// Create a node under parent. create makes a native handle from the parent's
    /// native handle, close releases one.
    pub fn new(parent: Arc<dyn Parent<P>>, create: Operation<P, Arc<H>>, close: Operation<H, ()>) -> Arc<Self> {
        Arc::new(Self {
            cluster: parent.cluster().clone(),
            parent,
            create,
            close,
            state: Mutex::new(NodeState { handles: BTreeMap::new(), log: Vec::new() }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Acquire) || self.parent.is_closed()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::closed())
        } else {
            Ok(())
        }
    }

    /// Returns the native handle for backend, creating it (and replaying the recorded
    /// writes onto it) if there is none or the existing one is stale.
    pub async fn get_or_create(&self, backend: &Backend) -> Option<Arc<H>> {
        let mut state = self.state.lock().await;
        self.get_or_create_locked(&mut state, backend).await
    }

    /// Returns the native handles of backends, skipping any that could not be created.
    pub async fn handles(&self, backends: &[Backend]) -> Vec<(Backend, Arc<H>)> {
        let mut state = self.state.lock().await;
        let mut handles = Vec::with_capacity(backends.len());
        for backend in backends {
            if let Some(handle) = self.get_or_create_locked(&mut state, backend).await {
                handles.push((backend.clone(), handle));
            }
        }
        handles
    }

    pub(crate) async fn get_or_create_locked(&self, state: &mut NodeState<H>, backend: &Backend) -> Option<Arc<H>> {
        let generation = self.cluster.generation(backend);
        if let Some(slot) = state.handles.get(backend) {
            if slot.generation == generation {
                return Some(slot.handle.clone());
            }
        }
        if let Some(stale) = state.handles.remove(backend) {
            debug!(%backend, "discarding stale handle");
            self.close_handle(backend, stale.handle).await;
        }

        let parent = self.parent.native(backend).await?;
        match self.create_and_replay(backend, parent, &state.log).await {
            Ok(handle) => {
                state.handles.insert(backend.clone(), Slot { generation, handle: handle.clone() });
                Some(handle)
            },
            Err(e) => {
                warn!(%backend, %e, "failed to create handle");
                self.cluster.deactivate_backend(backend).await;
                None
            },
        }
    }

    async fn create_and_replay(&self, backend: &Backend, parent: Arc<P>, log: &[Operation<H, ()>]) -> Result<Arc<H>> {
        let handle = (self.create)(backend.clone(), parent).await?;
        for op in log {
            if let Err(e) = op(backend.clone(), handle.clone()).await {
                self.close_handle(backend, handle).await;
                return Err(e);
            }
        }
        if !log.is_empty() {
            debug!(%backend, operations = log.len(), "replayed recorded operations");
        }
        Ok(handle)
    }

    pub(crate) async fn lock_state(&self) -> tokio::sync::MutexGuard<'_, NodeState<H>> {
        self.state.lock().await
    }

    /// Close every native handle. Errors are logged, closing always succeeds.
    pub async fn close(&self) {
        if self.closed.swap(true, Release) {
            return;
        }
        let handles = std::mem::take(&mut self.state.lock().await.handles);
        for (backend, slot) in handles {
            self.close_handle(&backend, slot.handle).await;
        }
    }

    async fn close_handle(&self, backend: &Backend, handle: Arc<H>) {
        if let Err(e) = (self.close)(backend.clone(), handle).await {
            debug!(%backend, %e, "error closing handle");
        }
    }
}

impl<P, H> Parent<H> for Multiplexer<P, H>
    where P: ?Sized + Send + Sync + 'static,
          H: ?Sized + Send + Sync + 'static
{
    fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    fn native<'a>(&'a self, backend: &'a Backend) -> BoxFuture<'a, Option<Arc<H>>> {
        Box::pin(self.get_or_create(backend))
    }

    fn is_closed(&self) -> bool {
        Multiplexer::is_closed(self)
    }
}
