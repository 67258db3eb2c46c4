use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use strum::Display;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::mirrordb::{Backend, Error, Result};
use crate::mirrordb::lock::GLOBAL_LOCK;
use crate::mirrordb::proxy::{operation, Method, Multiplexer, Operation};


/// How an operation on a proxy handle is routed to the backends.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum DispatchPolicy {
    /// Local, read-only state of the native handle: served by the primary.
    ReadFromDriver,
    /// Reads from the database: served by one backend chosen by the balancer.
    ReadFromDatabase,
    /// Local state changes of the native handles: applied to every backend in turn and recorded for replay.
    WriteToDriver,
    /// Writes to the databases: applied to every backend in parallel.
    WriteToDatabase,
}

impl<P, H> Multiplexer<P, H>
    where P: ?Sized + Send + Sync + 'static,
          H: ?Sized + Send + Sync + 'static
{
    /// Run op on the backends chosen by method's dispatch policy.
    /// For policies that run op on several backends, the result of the backend with the
    /// lowest id is returned.
    pub async fn invoke<R: Send + 'static>(&self, method: Method, op: Operation<H, R>) -> Result<R> {
        self.check_open()?;
        let policy = method.policy();
        debug!(cluster = %self.cluster().id(), %method, %policy, "dispatching");
        match policy {
            DispatchPolicy::ReadFromDriver => self.read_from_driver(op).await,
            DispatchPolicy::ReadFromDatabase => self.read_from_database(op).await,
            DispatchPolicy::WriteToDriver => {
                let mut first = None;
                for (_, result) in self.write_to_driver(op).await? {
                    let r = result?;
                    if first.is_none() {
                        first = Some(r);
                    }
                }
                first.ok_or_else(Error::no_active_backends)
            },
            DispatchPolicy::WriteToDatabase => {
                self.write_to_database(op).await?
                    .into_iter()
                    .next()
                    .map(|(_, r)| r)
                    .ok_or_else(Error::no_active_backends)
            },
        }
    }

    /// Run op on the primary backend. There's no retry, a failure is returned as is.
    pub async fn read_from_driver<R>(&self, op: Operation<H, R>) -> Result<R> {
        loop {
            let backend = self.cluster().balancer().primary().ok_or_else(Error::no_active_backends)?;
            // if the handle can't be created the backend is deactivated, try the new primary
            if let Some(handle) = self.get_or_create(&backend).await {
                return op(backend.clone(), handle).await.map_err(|e| Error::backend(backend.id(), e));
            }
        }
    }

    /// Run op on the backend chosen by the balancer. If it fails and the backend is
    /// alive, the error is returned. If the backend is dead it's deactivated and op is
    /// retried on the next backend, until none are left.
    pub async fn read_from_database<R>(&self, op: Operation<H, R>) -> Result<R> {
        let balancer = self.cluster().balancer().clone();
        loop {
            let backend = balancer.next().ok_or_else(Error::no_active_backends)?;
            let handle = match self.get_or_create(&backend).await {
                Some(handle) => handle,
                None => continue,
            };
            balancer.before_operation(&backend);
            let result = op(backend.clone(), handle).await;
            balancer.after_operation(&backend);
            match result {
                Ok(r) => return Ok(r),
                Err(e) => {
                    self.cluster().handle_failure(&backend, e).await?;
                    debug!(%backend, "retrying read on another backend");
                },
            }
        }
    }

    /// Run op on every active backend sequentially, under this node's lock, and record
    /// it for replay onto handles created later. Per-backend failures are returned
    /// alongside the successes, they don't deactivate anything.
    pub async fn write_to_driver<R: Send + 'static>(&self, op: Operation<H, R>) -> Result<BTreeMap<Backend, Result<R>>> {
        let mut state = self.lock_state().await;
        let backends = self.cluster().active_backends();
        let mut results = BTreeMap::new();
        for backend in backends {
            if let Some(handle) = self.get_or_create_locked(&mut state, &backend).await {
                let result = op(backend.clone(), handle).await.map_err(|e| Error::backend(backend.id(), e));
                results.insert(backend, result);
            }
        }
        state.record(operation(move |backend, handle: Arc<H>| {
            let f = op(backend, handle);
            async move { f.await.map(|_| ()) }
        }));
        if results.is_empty() {
            return Err(Error::no_active_backends());
        }
        Ok(results)
    }

    /// Run op on every active backend in parallel, holding the global read lock.
    ///
    /// Failures are resolved per backend: a dead backend is deactivated and dropped from
    /// the results, a rejection by a live backend fails the whole call. Returns the
    /// results of the backends that succeeded, which is never empty.
    pub async fn write_to_database<R: Send + 'static>(&self, op: Operation<H, R>) -> Result<BTreeMap<Backend, R>> {
        let cluster = self.cluster().clone();
        let _lock = cluster.lock_manager().read_lock(GLOBAL_LOCK).await?;
        let backends = cluster.active_backends();
        if backends.is_empty() {
            return Err(Error::no_active_backends());
        }
        let handles = self.handles(&backends).await;

        let mut shutdown = cluster.shutdown_signal();
        if *shutdown.borrow() {
            return Err(Error::closed());
        }
        let mut tasks = JoinSet::new();
        for (backend, handle) in handles {
            let f = AssertUnwindSafe(op(backend.clone(), handle)).catch_unwind();
            tasks.spawn(async move {
                let result = match f.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::new("operation panicked")),
                };
                (backend, result)
            });
        }

        let mut results = BTreeMap::new();
        let mut failures = Vec::new();
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = shutdown.changed() => {
                    tasks.abort_all();
                    return Err(Error::closed());
                },
            };
            match joined {
                None => break,
                Some(Ok((backend, Ok(r)))) => { results.insert(backend, r); },
                Some(Ok((backend, Err(e)))) => failures.push((backend, e)),
                Some(Err(e)) => return Err(e.into()),
            }
        }

        let mut rejection = None;
        for (backend, e) in failures {
            if let Err(e) = cluster.handle_failure(&backend, e).await {
                if rejection.is_none() {
                    rejection = Some(e);
                } else {
                    warn!(%backend, %e, "write rejected by another backend too");
                }
            }
        }
        if let Some(e) = rejection {
            return Err(e);
        }

        // A backend that joined the active set during the call missed this write
        for backend in cluster.active_backends() {
            if backends.binary_search(&backend).is_err() {
                warn!(%backend, "backend activated during write, deactivating");
                cluster.deactivate_backend(&backend).await;
            }
        }

        if results.is_empty() {
            return Err(Error::no_active_backends());
        }
        Ok(results)
    }
}
