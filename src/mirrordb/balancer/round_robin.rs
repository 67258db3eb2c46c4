use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use crate::mirrordb::Backend;
use crate::mirrordb::balancer::{Balancer, Membership, eligible};


/// RoundRobinBalancer cycles through the backends in id order, returning each
/// backend weight times in a row before moving on to the next.
pub struct RoundRobinBalancer {
    members: Membership<Vec<Backend>>,
    cursor: AtomicUsize,
}

/// Expands the eligible backends into one full cycle.
fn cycle(backends: &[Backend], _prev: Option<&Vec<Backend>>) -> Vec<Backend> {
    let mut sequence = Vec::new();
    for (backend, weight) in eligible(backends) {
        for _ in 0..weight {
            sequence.push(backend.clone());
        }
    }
    sequence
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            members: Membership::new(cycle),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Balancer for RoundRobinBalancer {
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
        let sequence = &snapshot.state;
        if sequence.is_empty() {
            return None;
        }
        // Wrapping on overflow is harmless, it only shifts the position in the cycle.
        let i = self.cursor.fetch_add(1, Relaxed);
        sequence.get(i % sequence.len()).cloned()
    }
}
