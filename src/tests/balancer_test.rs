use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use test_env_log::test;

use crate::tests::common::backend;
use crate::mirrordb::balancer::{Balancer, BalancerType, LoadBalancer, RoundRobinBalancer, SimpleBalancer};


fn ids(backends: &[crate::mirrordb::Backend]) -> Vec<&str> {
    backends.iter().map(|b| b.id()).collect()
}

#[test]
fn test_round_robin_skips_zero_weight() {
    let balancer = RoundRobinBalancer::new();
    let p = backend("p", 2);
    balancer.add(p.clone());
    balancer.add(backend("b", 0));

    for _ in 0..3 {
        assert_eq!(balancer.next(), Some(p.clone()));
    }
}

#[test]
fn test_round_robin_follows_weights() {
    let balancer = RoundRobinBalancer::new();
    balancer.add(backend("a", 1));
    balancer.add(backend("b", 2));

    let mut counts = HashMap::new();
    for _ in 0..30 {
        let b = balancer.next().unwrap();
        *counts.entry(b.id().to_string()).or_insert(0) += 1;
    }
    assert_eq!(counts["a"], 10);
    assert_eq!(counts["b"], 20);
}

#[test]
fn test_zero_weight_serves_when_alone() {
    for balancer_type in [BalancerType::Simple, BalancerType::Random, BalancerType::RoundRobin, BalancerType::Load] {
        let balancer = balancer_type.create();
        let b = backend("b", 0);
        balancer.add(b.clone());
        assert_eq!(balancer.next(), Some(b), "{}", balancer_type);
    }
}

#[test]
fn test_empty_balancer() {
    for balancer_type in [BalancerType::Simple, BalancerType::Random, BalancerType::RoundRobin, BalancerType::Load] {
        let balancer = balancer_type.create();
        assert!(balancer.is_empty());
        assert_eq!(balancer.next(), None);
        assert_eq!(balancer.primary(), None);
        assert!(balancer.backups().is_empty());
    }
}

#[test]
fn test_membership() {
    let balancer = RoundRobinBalancer::new();
    let a = backend("a", 1);
    let c = backend("c", 1);
    assert!(balancer.add(c.clone()));
    assert!(balancer.add(a.clone()));
    assert!(!balancer.add(a.clone()));
    assert_eq!(ids(&balancer.backends()), vec!["a", "c"]);
    assert_eq!(balancer.primary(), Some(a.clone()));
    assert_eq!(ids(&balancer.backups()), vec!["c"]);

    assert!(balancer.remove(&a));
    assert!(!balancer.remove(&a));
    assert!(!balancer.contains(&a));
    assert_eq!(balancer.next(), Some(c));

    balancer.clear();
    assert!(balancer.is_empty());
}

#[test]
fn test_simple_prefers_highest_weight() {
    let balancer = SimpleBalancer::new();
    balancer.add(backend("a", 1));
    balancer.add(backend("b", 3));
    balancer.add(backend("c", 3));

    assert_eq!(balancer.primary().unwrap().id(), "b");
    assert_eq!(balancer.next().unwrap().id(), "b");
    assert_eq!(ids(&balancer.backups()), vec!["c", "a"]);
}

#[test]
fn test_random_never_picks_zero_weight() {
    let balancer = BalancerType::Random.create();
    balancer.add(backend("a", 1));
    balancer.add(backend("b", 0));
    balancer.add(backend("c", 5));

    for _ in 0..200 {
        assert_ne!(balancer.next().unwrap().id(), "b");
    }
}

#[test]
fn test_load_picks_least_loaded() {
    let balancer = LoadBalancer::new();
    let a = backend("a", 1);
    let b = backend("b", 1);
    balancer.add(a.clone());
    balancer.add(b.clone());

    assert_eq!(balancer.next(), Some(a.clone()));
    balancer.before_operation(&a);
    assert_eq!(balancer.load(&a), 1);
    assert_eq!(balancer.next(), Some(b.clone()));
    balancer.before_operation(&b);
    balancer.before_operation(&b);
    assert_eq!(balancer.next(), Some(a.clone()));

    balancer.after_operation(&b);
    balancer.after_operation(&b);
    balancer.after_operation(&b);
    assert_eq!(balancer.load(&b), 0);

    // counters survive membership changes
    balancer.add(backend("c", 1));
    assert_eq!(balancer.load(&a), 1);
}

#[test]
fn test_load_respects_weight() {
    let balancer = LoadBalancer::new();
    let a = backend("a", 1);
    let b = backend("b", 3);
    balancer.add(a.clone());
    balancer.add(b.clone());

    // b has 3x the capacity, it takes operations until its load ratio ties with a
    for _ in 0..2 {
        let next = balancer.next().unwrap();
        assert_eq!(next, b);
        balancer.before_operation(&next);
    }
    assert_eq!(balancer.next(), Some(a));
}

#[test]
fn test_concurrent_membership_changes() {
    for balancer_type in [BalancerType::Simple, BalancerType::Random, BalancerType::RoundRobin, BalancerType::Load] {
        let balancer = balancer_type.create();
        // w is always a member, so the zero weight z must never be chosen
        let w = backend("w", 1);
        let x = backend("x", 2);
        let z = backend("z", 0);
        balancer.add(w.clone());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4).map(|_| {
            let balancer = balancer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut reads = 0;
                while !done.load(Ordering::Acquire) || reads < 100 {
                    let next = balancer.next().expect("a member is always present");
                    assert!(next.id() == "w" || next.id() == "x", "{} picked {}", balancer_type, next);
                    balancer.before_operation(&next);
                    balancer.after_operation(&next);

                    let members = balancer.backends();
                    assert!(members.iter().any(|b| b.id() == "w"), "{} lost w: {:?}", balancer_type, members);
                    assert!(members.windows(2).all(|pair| pair[0] < pair[1]), "{} unsorted: {:?}", balancer_type, members);
                    reads += 1;
                }
                reads
            })
        }).collect();

        for i in 0..500 {
            balancer.add(x.clone());
            balancer.add(z.clone());
            if i % 2 == 0 {
                balancer.remove(&x);
            }
            balancer.remove(&z);
            if i % 3 == 0 {
                balancer.remove(&x);
            }
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.join().unwrap() >= 100);
        }
        assert!(balancer.contains(&w));
        assert!(!balancer.contains(&z));
    }
}
