//! Selection strategies for choosing among healthy endpoints.

use crate::Endpoint;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Trait for implementing custom selection strategies.
///
/// The selector sees the healthy endpoints only and returns the index of the
/// one to use. It is called while the pool lock is held, so it must be quick
/// and must not block.
///
/// # Examples
///
/// ```rust
/// use tower_balancer::{Endpoint, Selector};
///
/// /// Always prefers the endpoint listed first in the healthy set.
/// struct Primary;
///
/// impl Selector for Primary {
///     fn select(&self, healthy: &[Endpoint]) -> Option<usize> {
///         (!healthy.is_empty()).then_some(0)
///     }
/// }
/// ```
pub trait Selector: Send + Sync {
    /// Returns the index of the selected endpoint, or `None` to select nothing.
    fn select(&self, healthy: &[Endpoint]) -> Option<usize>;
}

impl<F> Selector for F
where
    F: Fn(&[Endpoint]) -> Option<usize> + Send + Sync,
{
    fn select(&self, healthy: &[Endpoint]) -> Option<usize> {
        self(healthy)
    }
}

/// Built-in selection strategies.
#[derive(Clone, Default)]
pub enum SelectionStrategy {
    /// Pick uniformly at random.
    #[default]
    Random,

    /// Cycle through healthy endpoints.
    RoundRobin,

    /// Always pick the first healthy endpoint.
    /// Best for: primary/secondary failover.
    FirstAvailable,

    /// Use a custom selector implementation.
    Custom(Arc<dyn Selector>),
}

impl SelectionStrategy {
    /// Wrap a custom selector.
    pub fn custom<S>(selector: S) -> Self
    where
        S: Selector + 'static,
    {
        SelectionStrategy::Custom(Arc::new(selector))
    }

    pub(crate) fn select(&self, healthy: &[Endpoint], round_robin_counter: &AtomicUsize) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }

        match self {
            SelectionStrategy::Random => Some(rand::rng().random_range(0..healthy.len())),
            SelectionStrategy::RoundRobin => {
                let next = round_robin_counter.fetch_add(1, Ordering::Relaxed);
                Some(next % healthy.len())
            }
            SelectionStrategy::FirstAvailable => Some(0),
            SelectionStrategy::Custom(selector) => selector
                .select(healthy)
                .filter(|&idx| idx < healthy.len()),
        }
    }
}

impl fmt::Debug for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::Random => f.write_str("Random"),
            SelectionStrategy::RoundRobin => f.write_str("RoundRobin"),
            SelectionStrategy::FirstAvailable => f.write_str("FirstAvailable"),
            SelectionStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
