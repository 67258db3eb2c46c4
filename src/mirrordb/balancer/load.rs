use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, AcqRel};

use crate::mirrordb::Backend;
use crate::mirrordb::balancer::{Balancer, Membership, eligible};


type Counters = Vec<(Backend, Arc<AtomicUsize>)>;

/// LoadBalancer sends the next read to the backend with the fewest in-flight
/// operations relative to its weight. Ties go to the lowest id.
pub struct LoadBalancer {
    members: Membership<Counters>,
}

/// In-flight counters per member, in id order. Counters of backends that stay
/// members are carried over to the new snapshot.
fn counters(backends: &[Backend], prev: Option<&Counters>) -> Counters {
    backends.iter().map(|backend| {
        let count = prev
            .and_then(|prev| prev.iter().find(|(b, _)| b == backend))
            .map(|(_, count)| count.clone())
            .unwrap_or_default();
        (backend.clone(), count)
    }).collect()
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            members: Membership::new(counters),
        }
    }

    /// Returns the number of operations currently running against backend.
    pub fn load(&self, backend: &Backend) -> usize {
        self.counter(backend).map(|c| c.load(Acquire)).unwrap_or(0)
    }

    fn counter(&self, backend: &Backend) -> Option<Arc<AtomicUsize>> {
        let snapshot = self.members.load();
        let i = snapshot.state.binary_search_by(|(b, _)| b.cmp(backend)).ok()?;
        Some(snapshot.state[i].1.clone())
    }
}

impl Balancer for LoadBalancer {
    fn backends(&self) -> Vec<Backend> {
        self.members.load().backends.clone()
    }

    fn contains(&self, backend: &Backend) -> bool {
        self.members.contains(backend)
    }

    fn add(&self, backend: Backend) -> bool {
        self.members.add(backend)
    }

    fn remove(&self, backend: &Backend) -> bool {
        self.members.remove(backend)
    }

    fn clear(&self) {
        self.members.clear()
    }

    fn primary(&self) -> Option<Backend> {
        self.members.load().backends.first().cloned()
    }

    fn backups(&self) -> Vec<Backend> {
        self.members.load().backends.iter().skip(1).cloned().collect()
    }

    fn next(&self) -> Option<Backend> {
        let snapshot = self.members.load();
        let mut best: Option<(Backend, u64, u64)> = None;
        for (backend, weight) in eligible(&snapshot.backends) {
            let load = self.load(&backend) as u64 + 1;
            // Compare load/weight ratios without dividing: a < b <=> la*wb < lb*wa
            let better = match &best {
                None => true,
                Some((_, best_load, best_weight)) => load * best_weight < best_load * weight,
            };
            if better {
                best = Some((backend, load, weight));
            }
        }
        best.map(|(backend, _, _)| backend)
    }

    fn before_operation(&self, backend: &Backend) {
        if let Some(counter) = self.counter(backend) {
            counter.fetch_add(1, AcqRel);
        }
    }

    fn after_operation(&self, backend: &Backend) {
        if let Some(counter) = self.counter(backend) {
            // Never underflow, the backend may have been re-added with a fresh counter
            let _ = counter.fetch_update(AcqRel, Acquire, |n| n.checked_sub(1));
        }
    }
}
