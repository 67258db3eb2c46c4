use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fnv::FnvHashMap;
use tokio::sync::{RwLock, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, warn};

use crate::mirrordb::{Error, Result};


/// The name of the global lock.
pub const GLOBAL_LOCK: &str = "";

enum Guard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// LockGuard releases the lock(s) it holds when dropped.
pub struct LockGuard {
    // Declaration order is drop order: the named lock is released before the global lock.
    _named: Option<Guard>,
    _global: Guard,
}

/// LockManager hands out read/write locks by name.
///
/// The empty name is the global lock. Holding the global write lock excludes every
/// reader and writer of every named lock, because acquiring any named lock first takes
/// the global read lock. Locks are always taken global first, then named, so a waiting
/// global writer can't deadlock with named lock holders.
pub struct LockManager {
    global: Arc<RwLock<()>>,
    named: Mutex<FnvHashMap<String, Arc<RwLock<()>>>>,
    timeout: Option<Duration>,
}

impl LockManager {
    /// Create a LockManager. A zero timeout waits forever.
    pub fn new(timeout: Duration) -> Self {
        Self {
            global: Arc::new(RwLock::new(())),
            named: Mutex::new(FnvHashMap::default()),
            timeout: if timeout.as_nanos() == 0 { None } else { Some(timeout) },
        }
    }

    pub async fn read_lock(&self, name: &str) -> Result<LockGuard> {
        let global = self.acquire(GLOBAL_LOCK, self.global.clone().read_owned()).await?;
        if name.is_empty() {
            return Ok(LockGuard { _named: None, _global: Guard::Read(global) });
        }
        let lock = self.named_lock(name)?;
        let named = self.acquire(name, lock.read_owned()).await?;
        Ok(LockGuard { _named: Some(Guard::Read(named)), _global: Guard::Read(global) })
    }

    pub async fn write_lock(&self, name: &str) -> Result<LockGuard> {
        if name.is_empty() {
            let global = self.acquire(GLOBAL_LOCK, self.global.clone().write_owned()).await?;
            debug!("acquired global write lock");
            return Ok(LockGuard { _named: None, _global: Guard::Write(global) });
        }
        let global = self.acquire(GLOBAL_LOCK, self.global.clone().read_owned()).await?;
        let lock = self.named_lock(name)?;
        let named = self.acquire(name, lock.write_owned()).await?;
        Ok(LockGuard { _named: Some(Guard::Write(named)), _global: Guard::Read(global) })
    }

    fn named_lock(&self, name: &str) -> Result<Arc<RwLock<()>>> {
        let mut named = self.named.lock()?;
        // Drop locks nobody holds or waits on, so the map doesn't grow without bound
        if named.len() > 1024 {
            named.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Ok(named.entry(name.to_string()).or_default().clone())
    }

    async fn acquire<F: Future>(&self, name: &str, f: F) -> Result<F::Output> {
        match self.timeout {
            None => Ok(f.await),
            Some(timeout) => match tokio::time::timeout(timeout, f).await {
                Ok(guard) => Ok(guard),
                Err(_) => {
                    warn!(lock = name, ?timeout, "timed out waiting for lock");
                    Err(Error::lock_timeout(name))
                },
            },
        }
    }
}
