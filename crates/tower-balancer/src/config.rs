//! Configuration for the balancer.

use crate::events::BalancerEvent;
use crate::{BalancerLayer, BuildError, Endpoint, SelectionStrategy, SimpleHealthProbe};
use std::sync::Arc;
use std::time::Duration;
use tower_resilience_core::events::{EventListeners, FnListener};
use tower_resilience_core::EventListener;

/// Default time between recovery passes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Validated configuration shared by every balancer built from one layer.
pub struct BalancerConfig<P> {
    pub(crate) endpoints: Vec<Endpoint>,
    pub(crate) probe: Arc<P>,
    pub(crate) probe_interval: Duration,
    pub(crate) initial_delay: Duration,
    pub(crate) selection_strategy: SelectionStrategy,
    pub(crate) event_listeners: EventListeners<BalancerEvent>,
    pub(crate) name: String,
}

impl<P> BalancerConfig<P> {
    /// Configured endpoints, in order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The health probe used by the recovery loop.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Time between recovery passes.
    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    /// Delay before the first recovery pass.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Strategy for picking among healthy endpoints.
    pub fn selection_strategy(&self) -> &SelectionStrategy {
        &self.selection_strategy
    }

    /// Name used in logs, metrics and events.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn emit(&self, event: impl FnOnce() -> BalancerEvent) {
        if !self.event_listeners.is_empty() {
            self.event_listeners.emit(&event());
        }
    }
}

enum PendingEndpoint {
    Address(String),
    Parsed(Endpoint),
}

/// Builder for a [`BalancerLayer`].
///
/// Options apply in call order; endpoints accumulate, everything else is
/// last-write-wins.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use tower_balancer::{BalancerLayer, SelectionStrategy, SimpleHealthProbe};
///
/// let layer = BalancerLayer::builder()
///     .endpoints(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])
///     .health_probe(SimpleHealthProbe::new(http::Method::GET, "/ready", ""))
///     .probe_interval(Duration::from_secs(10))
///     .selection_strategy(SelectionStrategy::RoundRobin)
///     .name("users-api")
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(layer.config().endpoints().len(), 2);
/// ```
pub struct BalancerConfigBuilder<P = SimpleHealthProbe> {
    endpoints: Vec<PendingEndpoint>,
    probe: P,
    probe_interval: Duration,
    initial_delay: Duration,
    selection_strategy: SelectionStrategy,
    event_listeners: EventListeners<BalancerEvent>,
    name: String,
}

impl BalancerConfigBuilder<SimpleHealthProbe> {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            probe: SimpleHealthProbe::default(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            initial_delay: Duration::ZERO,
            selection_strategy: SelectionStrategy::default(),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }
}

impl Default for BalancerConfigBuilder<SimpleHealthProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> BalancerConfigBuilder<P> {
    /// Add one endpoint address, e.g. `http://10.0.0.1:8080/prefix`.
    pub fn endpoint(mut self, address: impl Into<String>) -> Self {
        self.endpoints.push(PendingEndpoint::Address(address.into()));
        self
    }

    /// Add several endpoint addresses.
    pub fn endpoints<I, A>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.endpoints
            .extend(addresses.into_iter().map(|a| PendingEndpoint::Address(a.into())));
        self
    }

    /// Add an already parsed endpoint.
    pub fn endpoint_handle(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(PendingEndpoint::Parsed(endpoint));
        self
    }

    /// Set the probe used to decide when an unhealthy endpoint has recovered.
    ///
    /// Default: `GET /healthz` expecting body `ok`
    pub fn health_probe<Q>(self, probe: Q) -> BalancerConfigBuilder<Q> {
        BalancerConfigBuilder {
            endpoints: self.endpoints,
            probe,
            probe_interval: self.probe_interval,
            initial_delay: self.initial_delay,
            selection_strategy: self.selection_strategy,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }

    /// Set the time between recovery passes.
    ///
    /// Default: 5 seconds
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set a delay before the first recovery pass.
    ///
    /// Default: none, the first pass runs one interval after start
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the strategy for picking among healthy endpoints.
    ///
    /// Default: `SelectionStrategy::Random`
    pub fn selection_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selection_strategy = strategy;
        self
    }

    /// Give this balancer a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Register a listener for every event.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tower_balancer::{BalancerEvent, BalancerLayer};
    /// use tower_resilience_core::events::FnListener;
    ///
    /// let layer = BalancerLayer::builder()
    ///     .endpoint("http://a:80")
    ///     .on_event(FnListener::new(|event: &BalancerEvent| {
    ///         println!("{:?}", event);
    ///     }))
    ///     .build()?;
    /// # Ok::<(), tower_balancer::BuildError>(())
    /// ```
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: EventListener<BalancerEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Called with the endpoint address and the remaining healthy count
    /// whenever an endpoint is taken out of rotation.
    pub fn on_demoted<F>(self, f: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.on_event(FnListener::new(move |event: &BalancerEvent| {
            if let BalancerEvent::Demoted {
                endpoint,
                healthy_remaining,
                ..
            } = event
            {
                f(endpoint, *healthy_remaining);
            }
        }))
    }

    /// Called with the endpoint address and the new healthy count whenever an
    /// endpoint passes its probe.
    pub fn on_promoted<F>(self, f: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.on_event(FnListener::new(move |event: &BalancerEvent| {
            if let BalancerEvent::Promoted {
                endpoint,
                healthy_remaining,
                ..
            } = event
            {
                f(endpoint, *healthy_remaining);
            }
        }))
    }

    /// Called whenever a request is rejected because nothing is healthy.
    pub fn on_rejected<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_event(FnListener::new(move |event: &BalancerEvent| {
            if let BalancerEvent::Rejected { .. } = event {
                f();
            }
        }))
    }

    /// Called with the endpoint address and reason whenever a probe fails.
    pub fn on_probe_failed<F>(self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_event(FnListener::new(move |event: &BalancerEvent| {
            if let BalancerEvent::ProbeFailed {
                endpoint, reason, ..
            } = event
            {
                f(endpoint, reason);
            }
        }))
    }

    /// Validate the options and build the layer.
    pub fn build(self) -> Result<BalancerLayer<P>, BuildError> {
        if self.endpoints.is_empty() {
            return Err(BuildError::NoEndpoints);
        }
        if self.probe_interval.is_zero() {
            return Err(BuildError::InvalidProbeInterval);
        }

        let endpoints = self
            .endpoints
            .into_iter()
            .map(|pending| match pending {
                PendingEndpoint::Address(address) => Endpoint::parse(address),
                PendingEndpoint::Parsed(endpoint) => Ok(endpoint),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BalancerLayer::new(BalancerConfig {
            endpoints,
            probe: Arc::new(self.probe),
            probe_interval: self.probe_interval,
            initial_delay: self.initial_delay,
            selection_strategy: self.selection_strategy,
            event_listeners: self.event_listeners,
            name: self.name,
        }))
    }
}
