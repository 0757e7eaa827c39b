//! Property tests for the endpoint pool.
//!
//! Invariants tested:
//! - Healthy and unhealthy are disjoint and cover every endpoint
//! - Both halves stay in configuration order
//! - The pool agrees with a simple set model after any move sequence
//! - `pick_healthy` succeeds until every endpoint has been demoted
//! - Demote followed by promote restores the partition
//! - Only healthy endpoints are ever picked

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tower_balancer::{Endpoint, EndpointId, EndpointPool, EndpointStatus, SelectionStrategy};

fn endpoints(n: usize) -> Vec<Endpoint> {
    (0..n)
        .map(|i| Endpoint::parse(format!("http://backend-{i}:8080")).unwrap())
        .collect()
}

fn ids(endpoints: &[Endpoint]) -> HashSet<EndpointId> {
    endpoints.iter().map(Endpoint::id).collect()
}

fn assert_partition(pool: &EndpointPool) -> Result<(), TestCaseError> {
    let snapshot = pool.snapshot();
    let healthy = ids(&snapshot.healthy);
    let unhealthy = ids(&snapshot.unhealthy);
    let all = ids(pool.endpoints());

    prop_assert!(healthy.is_disjoint(&unhealthy));
    prop_assert_eq!(snapshot.healthy.len() + snapshot.unhealthy.len(), all.len());
    prop_assert_eq!(&healthy | &unhealthy, all);

    let in_order = |half: &[Endpoint]| {
        let expected: Vec<&Endpoint> = pool
            .endpoints()
            .iter()
            .filter(|e| half.contains(e))
            .collect();
        half.iter().eq(expected)
    };
    prop_assert!(in_order(&snapshot.healthy));
    prop_assert!(in_order(&snapshot.unhealthy));
    Ok(())
}

fn strategy() -> impl Strategy<Value = SelectionStrategy> {
    prop_oneof![
        Just(SelectionStrategy::Random),
        Just(SelectionStrategy::RoundRobin),
        Just(SelectionStrategy::FirstAvailable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: any sequence of moves keeps the partition and matches the model
    #[test]
    fn moves_keep_partition(
        n in 1usize..=12,
        ops in prop::collection::vec((any::<bool>(), 0usize..12), 0..200),
    ) {
        let all = endpoints(n);
        let pool = EndpointPool::new(all.clone(), SelectionStrategy::Random);
        let mut unhealthy_model = HashSet::new();

        for (demote, idx) in ops {
            let endpoint = &all[idx % n];
            if demote {
                let moved = pool.demote(endpoint);
                prop_assert_eq!(moved, unhealthy_model.insert(endpoint.id()));
            } else {
                let moved = pool.promote(endpoint);
                prop_assert_eq!(moved, unhealthy_model.remove(&endpoint.id()));
            }
            assert_partition(&pool)?;
        }

        for endpoint in &all {
            let expected = if unhealthy_model.contains(&endpoint.id()) {
                EndpointStatus::Unhealthy
            } else {
                EndpointStatus::Healthy
            };
            prop_assert_eq!(pool.status(endpoint), Some(expected));
        }
    }

    /// Property: with N healthy endpoints, picking never fails before N demotions
    #[test]
    fn pick_succeeds_until_all_demoted(n in 1usize..=16, strategy in strategy()) {
        let all = endpoints(n);
        let pool = EndpointPool::new(all.clone(), strategy);

        for endpoint in &all {
            prop_assert!(pool.pick_healthy().is_ok());
            pool.demote(endpoint);
        }

        prop_assert!(pool.pick_healthy().is_err());
    }

    /// Property: demote then promote restores the original partition
    #[test]
    fn demote_promote_round_trip(
        n in 1usize..=10,
        pre_demoted in prop::collection::vec(any::<bool>(), 10),
        target in 0usize..10,
    ) {
        let all = endpoints(n);
        let pool = EndpointPool::new(all.clone(), SelectionStrategy::Random);
        for (endpoint, demote) in all.iter().zip(&pre_demoted) {
            if *demote {
                pool.demote(endpoint);
            }
        }

        let target = &all[target % n];
        prop_assume!(pool.status(target) == Some(EndpointStatus::Healthy));

        let before = pool.snapshot();
        pool.demote(target);
        pool.promote(target);
        let after = pool.snapshot();

        prop_assert_eq!(ids(&before.healthy), ids(&after.healthy));
        prop_assert_eq!(ids(&before.unhealthy), ids(&after.unhealthy));
    }

    /// Property: every pick comes from the healthy half
    #[test]
    fn only_healthy_endpoints_are_picked(
        n in 1usize..=10,
        demoted in prop::collection::vec(any::<bool>(), 10),
        strategy in strategy(),
    ) {
        let all = endpoints(n);
        let pool = EndpointPool::new(all.clone(), strategy);
        for (endpoint, demote) in all.iter().zip(&demoted) {
            if *demote {
                pool.demote(endpoint);
            }
        }

        let healthy = ids(&pool.snapshot().healthy);
        for _ in 0..50 {
            match pool.pick_healthy() {
                Ok(endpoint) => prop_assert!(healthy.contains(&endpoint.id())),
                Err(_) => prop_assert!(healthy.is_empty()),
            }
        }
    }

    /// Property: concurrent moves from many threads never break the partition
    #[test]
    fn concurrent_moves_keep_partition(n in 2usize..=8, rounds in 10usize..=200) {
        let all = endpoints(n);
        let pool = Arc::new(EndpointPool::new(all.clone(), SelectionStrategy::RoundRobin));

        let handles: Vec<_> = all
            .into_iter()
            .enumerate()
            .map(|(i, endpoint)| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for round in 0..rounds {
                        if (round + i) % 2 == 0 {
                            pool.demote(&endpoint);
                        } else {
                            pool.promote(&endpoint);
                        }
                        let _ = pool.pick_healthy();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_partition(&pool)?;
    }
}
