use rand::Rng;

use crate::mirrordb::Backend;
use crate::mirrordb::balancer::{Balancer, Membership, eligible};


/// RandomBalancer picks a backend at random, with probability proportional to its weight.
pub struct RandomBalancer {
    members: Membership<Vec<(u64, Backend)>>,
}

/// Cumulative weights of the eligible backends, in id order.
fn cumulative(backends: &[Backend], _prev: Option<&Vec<(u64, Backend)>>) -> Vec<(u64, Backend)> {
    let mut total = 0;
    eligible(backends).into_iter().map(|(backend, weight)| {
        total += weight;
        (total, backend)
    }).collect()
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            members: Membership::new(cumulative),
        }
    }
}

impl Balancer for RandomBalancer {
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
        let weights = &snapshot.state;
        let total = weights.last()?.0;
        let r = rand::thread_rng().gen_range(0..total);
        let i = weights.partition_point(|(cumulative, _)| *cumulative <= r);
        weights.get(i).map(|(_, backend)| backend.clone())
    }
}
