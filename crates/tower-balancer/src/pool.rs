//! The healthy/unhealthy partition of a balancer's endpoints.

use crate::{Endpoint, EndpointId, NoHealthyEndpoint, SelectionStrategy};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Health of an endpoint inside a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// In rotation.
    Healthy,
    /// Out of rotation until a probe succeeds.
    Unhealthy,
}

impl EndpointStatus {
    /// Check if the endpoint is in rotation.
    pub fn is_healthy(&self) -> bool {
        matches!(self, EndpointStatus::Healthy)
    }
}

/// A point-in-time copy of a pool's partition.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    /// Endpoints in rotation.
    pub healthy: Vec<Endpoint>,
    /// Endpoints waiting for a successful probe.
    pub unhealthy: Vec<Endpoint>,
}

#[derive(Debug)]
struct Partition {
    healthy: Vec<Endpoint>,
    unhealthy: Vec<Endpoint>,
}

impl Partition {
    fn status(&self, endpoint: &Endpoint) -> Option<EndpointStatus> {
        if self.healthy.contains(endpoint) {
            Some(EndpointStatus::Healthy)
        } else if self.unhealthy.contains(endpoint) {
            Some(EndpointStatus::Unhealthy)
        } else {
            None
        }
    }
}

/// Moves `endpoint` from `from` to `to`, keeping `to` sorted by `rank`.
/// Returns false if it was not in `from`.
///
/// Lookup is by endpoint identity; the rank-ordered insert exists only to
/// keep both halves in configuration order for `FirstAvailable` failover.
fn move_between(
    from: &mut Vec<Endpoint>,
    to: &mut Vec<Endpoint>,
    endpoint: &Endpoint,
    rank: impl Fn(&Endpoint) -> usize,
) -> bool {
    match from.iter().position(|e| e == endpoint) {
        Some(pos) => {
            let moved = from.remove(pos);
            let at = to.partition_point(|e| rank(e) < rank(&moved));
            to.insert(at, moved);
            true
        }
        None => false,
    }
}

/// Thread-safe partition of a fixed endpoint set into healthy and unhealthy.
///
/// One mutex guards both halves, so every observation sees each configured
/// endpoint in exactly one of them. The lock is only held for in-memory
/// bookkeeping, never across I/O. Both halves stay in configuration order,
/// which is what `SelectionStrategy::FirstAvailable` relies on for failover.
///
/// # Examples
///
/// ```rust
/// use tower_balancer::{Endpoint, EndpointPool, SelectionStrategy};
///
/// let a = Endpoint::parse("http://a:80").unwrap();
/// let b = Endpoint::parse("http://b:80").unwrap();
/// let pool = EndpointPool::new(vec![a.clone(), b.clone()], SelectionStrategy::Random);
///
/// pool.demote(&a);
/// assert_eq!(pool.pick_healthy().unwrap(), b);
///
/// pool.promote(&a);
/// assert_eq!(pool.healthy_count(), 2);
/// ```
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    ranks: HashMap<EndpointId, usize>,
    partition: Mutex<Partition>,
    strategy: SelectionStrategy,
    round_robin_counter: AtomicUsize,
}

impl EndpointPool {
    /// Create a pool in which every endpoint starts healthy.
    ///
    /// Registering the same handle twice keeps a single entry.
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>, strategy: SelectionStrategy) -> Self {
        let mut unique: Vec<Endpoint> = Vec::new();
        for endpoint in endpoints {
            if !unique.contains(&endpoint) {
                unique.push(endpoint);
            }
        }

        Self {
            ranks: unique.iter().enumerate().map(|(i, e)| (e.id(), i)).collect(),
            partition: Mutex::new(Partition {
                healthy: unique.clone(),
                unhealthy: Vec::with_capacity(unique.len()),
            }),
            endpoints: unique,
            strategy,
            round_robin_counter: AtomicUsize::new(0),
        }
    }

    fn rank(&self, endpoint: &Endpoint) -> usize {
        self.ranks.get(&endpoint.id()).copied().unwrap_or(usize::MAX)
    }

    // Each critical section leaves the partition consistent, so a poisoned
    // lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, Partition> {
        self.partition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick a healthy endpoint using the pool's selection strategy.
    pub fn pick_healthy(&self) -> Result<Endpoint, NoHealthyEndpoint> {
        let partition = self.lock();
        self.strategy
            .select(&partition.healthy, &self.round_robin_counter)
            .and_then(|idx| partition.healthy.get(idx))
            .cloned()
            .ok_or(NoHealthyEndpoint)
    }

    /// Take an endpoint out of rotation.
    ///
    /// Returns true if the endpoint was healthy. Demoting an unhealthy or
    /// unknown endpoint changes nothing.
    pub fn demote(&self, endpoint: &Endpoint) -> bool {
        let mut partition = self.lock();
        let Partition { healthy, unhealthy } = &mut *partition;
        move_between(healthy, unhealthy, endpoint, |e| self.rank(e))
    }

    /// Put an endpoint back into rotation.
    ///
    /// Returns true if the endpoint was unhealthy. Promoting a healthy or
    /// unknown endpoint changes nothing.
    pub fn promote(&self, endpoint: &Endpoint) -> bool {
        let mut partition = self.lock();
        let Partition { healthy, unhealthy } = &mut *partition;
        move_between(unhealthy, healthy, endpoint, |e| self.rank(e))
    }

    /// Copy both halves of the partition.
    pub fn snapshot(&self) -> PoolSnapshot {
        let partition = self.lock();
        PoolSnapshot {
            healthy: partition.healthy.clone(),
            unhealthy: partition.unhealthy.clone(),
        }
    }

    /// Copy of the unhealthy half only.
    pub fn unhealthy(&self) -> Vec<Endpoint> {
        self.lock().unhealthy.clone()
    }

    /// Current status of an endpoint, or `None` if it is not part of this pool.
    pub fn status(&self, endpoint: &Endpoint) -> Option<EndpointStatus> {
        self.lock().status(endpoint)
    }

    /// Number of endpoints in rotation.
    pub fn healthy_count(&self) -> usize {
        self.lock().healthy.len()
    }

    /// Number of endpoints out of rotation.
    pub fn unhealthy_count(&self) -> usize {
        self.lock().unhealthy.len()
    }

    /// All endpoints, in the order they were configured.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Total number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if the pool has no endpoints at all.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// The selection strategy used by [`pick_healthy`](Self::pick_healthy).
    pub fn strategy(&self) -> &SelectionStrategy {
        &self.strategy
    }
}
