mod simple;
mod random;
mod round_robin;
mod load;

use std::sync::{Arc, RwLock};

use serde::Deserialize;
use strum::Display;

use crate::mirrordb::Backend;

pub use self::simple::SimpleBalancer;
pub use self::random::RandomBalancer;
pub use self::round_robin::RoundRobinBalancer;
pub use self::load::LoadBalancer;


/// Balancer holds the active backends of a cluster and decides which of them serves a read.
///
/// Membership may change (add/remove) while other threads call next(). Implementations
/// replace an immutable snapshot of the membership on every change, so readers never
/// observe a partial update.
pub trait Balancer: Send + Sync {
    /// Returns all members, ordered by id.
    fn backends(&self) -> Vec<Backend>;

    fn contains(&self, backend: &Backend) -> bool;

    /// Adds backend, returns false if it was already a member.
    fn add(&self, backend: Backend) -> bool;

    /// Removes backend, returns false if it was not a member.
    fn remove(&self, backend: &Backend) -> bool;

    fn clear(&self);

    /// The backend preferred for reads that must go to one deterministic backend.
    fn primary(&self) -> Option<Backend>;

    /// All members except the primary, in the same preference order as primary().
    fn backups(&self) -> Vec<Backend>;

    /// The backend to serve the next load-balanced read.
    fn next(&self) -> Option<Backend>;

    /// Called before an operation is run against backend.
    fn before_operation(&self, _backend: &Backend) {}

    /// Called after an operation against backend completes (successfully or not).
    fn after_operation(&self, _backend: &Backend) {}

    fn len(&self) -> usize {
        self.backends().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerType {
    Simple,
    Random,
    RoundRobin,
    Load,
}

impl Default for BalancerType {
    fn default() -> Self {
        BalancerType::RoundRobin
    }
}

impl BalancerType {
    pub fn create(self) -> Arc<dyn Balancer> {
        match self {
            BalancerType::Simple => Arc::new(SimpleBalancer::new()),
            BalancerType::Random => Arc::new(RandomBalancer::new()),
            BalancerType::RoundRobin => Arc::new(RoundRobinBalancer::new()),
            BalancerType::Load => Arc::new(LoadBalancer::new()),
        }
    }
}

/// Snapshot is one immutable version of the membership plus derived policy state.
pub(crate) struct Snapshot<S> {
    /// members, sorted by id
    pub backends: Vec<Backend>,
    pub state: S,
}

/// Membership is a copy-on-write set of backends. Each change builds a new Snapshot
/// (recomputing the policy state with build) and swaps it in.
pub(crate) struct Membership<S> {
    current: RwLock<Arc<Snapshot<S>>>,
    build: fn(&[Backend], Option<&S>) -> S,
}

impl<S> Membership<S> {
    pub fn new(build: fn(&[Backend], Option<&S>) -> S) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot { backends: Vec::new(), state: build(&[], None) })),
            build,
        }
    }

    pub fn load(&self) -> Arc<Snapshot<S>> {
        // A panic while holding the write lock can't leave a partial snapshot behind,
        // so it's safe to ignore poisoning.
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update<F: FnOnce(&mut Vec<Backend>) -> bool>(&self, f: F) -> bool {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut backends = current.backends.clone();
        if !f(&mut backends) {
            return false;
        }
        let state = (self.build)(&backends, Some(&current.state));
        *current = Arc::new(Snapshot { backends, state });
        true
    }

    pub fn add(&self, backend: Backend) -> bool {
        self.update(|backends| {
            match backends.binary_search(&backend) {
                Ok(_) => false,
                Err(i) => {
                    backends.insert(i, backend);
                    true
                },
            }
        })
    }

    pub fn remove(&self, backend: &Backend) -> bool {
        self.update(|backends| {
            match backends.binary_search(backend) {
                Ok(i) => {
                    backends.remove(i);
                    true
                },
                Err(_) => false,
            }
        })
    }

    pub fn clear(&self) {
        self.update(|backends| {
            backends.clear();
            true
        });
    }

    pub fn contains(&self, backend: &Backend) -> bool {
        self.load().backends.binary_search(backend).is_ok()
    }
}

/// Returns the backends eligible for load-balanced reads with their effective weights.
/// Weight 0 backends are excluded, unless no backend has a non-zero weight, in which
/// case every backend is eligible with weight 1.
pub(crate) fn eligible(backends: &[Backend]) -> Vec<(Backend, u64)> {
    let weighted: Vec<_> = backends.iter()
        .filter(|b| b.weight() > 0)
        .map(|b| (b.clone(), b.weight() as u64))
        .collect();
    if weighted.is_empty() {
        backends.iter().map(|b| (b.clone(), 1)).collect()
    } else {
        weighted
    }
}
