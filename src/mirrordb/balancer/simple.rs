use std::cmp::Ordering;

use crate::mirrordb::Backend;
use crate::mirrordb::balancer::{Balancer, Membership};


/// SimpleBalancer sends every read to the primary: the backend with the highest
/// weight, ties going to the lowest id.
pub struct SimpleBalancer {
    members: Membership<()>,
}

impl SimpleBalancer {
    pub fn new() -> Self {
        Self {
            members: Membership::new(|_, _| ()),
        }
    }

    fn ordered(&self) -> Vec<Backend> {
        let mut backends = self.members.load().backends.clone();
        backends.sort_by(preference);
        backends
    }
}

/// Higher weight first, then lower id.
fn preference(a: &Backend, b: &Backend) -> Ordering {
    b.weight().cmp(&a.weight()).then_with(|| a.cmp(b))
}

impl Balancer for SimpleBalancer {
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
        self.members.load().backends.iter().min_by(|a, b| preference(a, b)).cloned()
    }

    fn backups(&self) -> Vec<Backend> {
        let mut ordered = self.ordered();
        if !ordered.is_empty() {
            ordered.remove(0);
        }
        ordered
    }

    fn next(&self) -> Option<Backend> {
        self.primary()
    }
}
