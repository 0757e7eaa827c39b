//! A cache of balancers keyed by their endpoint set.

use crate::{balancer_builder, Balancer, BuildError, SimpleHealthProbe};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Cache key for a set of endpoint addresses.
///
/// Addresses are trimmed, sorted and joined with `,`, so the same set in any
/// order maps to the same key.
///
/// # Examples
///
/// ```rust
/// use tower_balancer::registry_key;
///
/// assert_eq!(
///     registry_key(["http://b:80", " http://a:80"]),
///     "http://a:80,http://b:80"
/// );
/// ```
pub fn registry_key<I, A>(addresses: I) -> String
where
    I: IntoIterator<Item = A>,
    A: AsRef<str>,
{
    let mut addresses: Vec<String> = addresses
        .into_iter()
        .map(|a| a.as_ref().trim().to_string())
        .collect();
    addresses.sort();
    addresses.join(",")
}

/// Hands out one shared balancer per endpoint set.
///
/// The registry is a plain value: whoever owns it decides how long cached
/// balancers live. Entries are never evicted. Returned balancers are clones
/// of the cached one and share its pool and recovery loop.
///
/// # Examples
///
/// ```rust
/// use http::{Request, Response};
/// use tower::service_fn;
/// use tower_balancer::BalancerRegistry;
///
/// let executor = service_fn(|_: Request<String>| async {
///     Ok::<_, std::io::Error>(Response::new(String::new()))
/// });
///
/// let registry: BalancerRegistry<_> = BalancerRegistry::new();
/// let first = registry.get_or_build(["http://a:80", "http://b:80"], executor.clone())?;
/// let second = registry.get_or_build(["http://b:80", "http://a:80"], executor)?;
///
/// assert_eq!(registry.len(), 1);
/// assert_eq!(first.endpoints(), second.endpoints());
/// # Ok::<(), tower_balancer::BuildError>(())
/// ```
pub struct BalancerRegistry<S, P = SimpleHealthProbe> {
    balancers: Mutex<HashMap<String, Balancer<S, P>>>,
}

impl<S, P> BalancerRegistry<S, P> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            balancers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Balancer<S, P>>> {
        self.balancers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cached balancers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keys of the cached balancers, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl<S, P> BalancerRegistry<S, P>
where
    S: Clone,
{
    /// The cached balancer for `addresses`, if any.
    pub fn get<I, A>(&self, addresses: I) -> Option<Balancer<S, P>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        self.lock().get(&registry_key(addresses)).cloned()
    }

    /// Return the cached balancer for `addresses`, or build and cache one.
    ///
    /// `build` runs at most once per key. If it fails, the error is returned
    /// and nothing is cached.
    pub fn get_or_try_insert_with<I, A, F, E>(&self, addresses: I, build: F) -> Result<Balancer<S, P>, E>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
        F: FnOnce() -> Result<Balancer<S, P>, E>,
    {
        let key = registry_key(addresses);
        let mut balancers = self.lock();
        if let Some(balancer) = balancers.get(&key) {
            return Ok(balancer.clone());
        }

        let balancer = build()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %key, "cached new balancer");
        balancers.insert(key, balancer.clone());
        Ok(balancer)
    }
}

impl<S> BalancerRegistry<S, SimpleHealthProbe>
where
    S: Clone,
{
    /// Return the cached balancer for `addresses`, or build one with default
    /// settings around `executor`.
    pub fn get_or_build<I, A>(&self, addresses: I, executor: S) -> Result<Balancer<S>, BuildError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(|a| a.as_ref().to_string())
            .collect();
        self.get_or_try_insert_with(&addresses, || {
            let layer = balancer_builder()
                .endpoints(addresses.iter().map(String::as_str))
                .name(registry_key(&addresses))
                .build()?;
            Ok(layer.build_service(executor))
        })
    }
}

impl<S, P> Default for BalancerRegistry<S, P> {
    fn default() -> Self {
        Self::new()
    }
}
