//! Client-side load balancing for HTTP request executors.
//!
//! A [`Balancer`] wraps any Tower service that sends `http::Request`s (a
//! hyper client, a mock, another middleware stack) and spreads calls across a
//! fixed set of backend endpoints.
//!
//! ## How health is tracked
//!
//! - **Passive demotion**: when the executor returns an error for a request,
//!   the endpoint it was sent to leaves rotation. The error is returned to the
//!   caller unchanged; the request is never retried on another endpoint.
//! - **Active recovery**: a background loop probes every unhealthy endpoint on
//!   a fixed interval (default 5 seconds) and puts it back into rotation once
//!   the probe passes.
//!
//! Response status codes never affect health on the request path; only
//! executor errors do.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use std::time::Duration;
//! use tower::service_fn;
//! use tower_balancer::{balancer_builder, SimpleHealthProbe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let layer = balancer_builder()
//!         .endpoints(["http://10.0.0.1:8080", "http://10.0.0.2:8080/api"])
//!         .health_probe(SimpleHealthProbe::new(http::Method::GET, "/healthz", "ok"))
//!         .probe_interval(Duration::from_secs(5))
//!         .name("users")
//!         .build()?;
//!
//!     // Any executor works; here a stand-in that answers every request.
//!     let executor = service_fn(|req: Request<String>| async move {
//!         let body = format!("{} {}", req.method(), req.uri());
//!         Ok::<_, std::io::Error>(Response::new(Full::new(Bytes::from(body))))
//!     });
//!
//!     let balancer = layer.build_service(executor);
//!     balancer.start().await;
//!
//!     match balancer.execute(Request::get("/users/42").body(String::new())?).await {
//!         Ok(response) => println!("status {}", response.status()),
//!         Err(e) if e.is_no_healthy_endpoint() => println!("every endpoint is down"),
//!         Err(e) => println!("request failed: {e}"),
//!     }
//!
//!     balancer.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//! - `tracing` (default): structured logs via the `tracing` crate.
//! - `metrics`: counters and gauges via the `metrics` crate.

use crate::recovery::{RecoveryHandle, RecoveryLoop};
use futures::future::BoxFuture;
use http::{Request, Response};
use http_body::Body;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::fmt;
#[cfg(feature = "metrics")]
use std::sync::Once;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceExt;
use tower_service::Service;

pub use config::{BalancerConfig, BalancerConfigBuilder, DEFAULT_PROBE_INTERVAL};
pub use endpoint::{Endpoint, EndpointId};
pub use error::{BalancerError, BuildError, NoHealthyEndpoint};
pub use events::BalancerEvent;
pub use layer::BalancerLayer;
pub use pool::{EndpointPool, EndpointStatus, PoolSnapshot};
pub use probe::{HealthProbe, SimpleHealthProbe};
pub use recovery::RecoveryReport;
pub use registry::{registry_key, BalancerRegistry};
pub use selector::{SelectionStrategy, Selector};

mod config;
mod endpoint;
mod error;
mod events;
mod layer;
mod pool;
mod probe;
mod recovery;
mod registry;
mod selector;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Returns a new builder for a [`BalancerLayer`].
///
/// Same as [`BalancerLayer::builder`]; also registers metric descriptions
/// when the `metrics` feature is enabled.
pub fn balancer_builder() -> BalancerConfigBuilder {
    #[cfg(feature = "metrics")]
    {
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "balancer_calls_total",
                "Total number of calls through the balancer by outcome"
            );
            describe_counter!(
                "balancer_transitions_total",
                "Total number of endpoint health transitions"
            );
            describe_counter!(
                "balancer_probes_total",
                "Total number of recovery probes by outcome"
            );
            describe_gauge!(
                "balancer_healthy_endpoints",
                "Number of endpoints currently in rotation"
            );
        });
    }
    BalancerConfigBuilder::new()
}

struct Shared<P> {
    pool: Arc<EndpointPool>,
    config: Arc<BalancerConfig<P>>,
    recovery: Mutex<Option<RecoveryHandle>>,
}

impl<P> Shared<P> {
    fn recovery(&self) -> MutexGuard<'_, Option<RecoveryHandle>> {
        self.recovery.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A Tower service that load balances requests over a pool of endpoints.
///
/// Built by [`BalancerLayer`]. Clones share the pool, the configuration and
/// the recovery loop; the loop is signalled to stop when the last clone is
/// dropped.
pub struct Balancer<S, P = SimpleHealthProbe> {
    inner: S,
    shared: Arc<Shared<P>>,
}

impl<S, P> Balancer<S, P> {
    pub(crate) fn new(inner: S, config: Arc<BalancerConfig<P>>) -> Self {
        let pool = EndpointPool::new(
            config.endpoints.iter().cloned(),
            config.selection_strategy.clone(),
        );

        Self {
            inner,
            shared: Arc::new(Shared {
                pool: Arc::new(pool),
                config,
                recovery: Mutex::new(None),
            }),
        }
    }

    /// The endpoint pool.
    pub fn pool(&self) -> &EndpointPool {
        &self.shared.pool
    }

    /// All configured endpoints, in configuration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        self.shared.pool.endpoints()
    }

    /// A copy of the current healthy/unhealthy partition.
    pub fn snapshot(&self) -> PoolSnapshot {
        self.shared.pool.snapshot()
    }

    /// The balancer's configured name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The configuration this balancer was built from.
    pub fn config(&self) -> &BalancerConfig<P> {
        &self.shared.config
    }

    /// Returns a reference to the request executor.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Whether the recovery loop is running.
    pub fn is_running(&self) -> bool {
        self.shared
            .recovery()
            .as_ref()
            .is_some_and(RecoveryHandle::is_running)
    }

    /// Stop the recovery loop and wait for it to exit.
    ///
    /// A probe already in flight completes; no new probe is started. Does
    /// nothing if the loop is not running.
    pub async fn stop(&self) {
        let handle = self.shared.recovery().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}

impl<S, P> Balancer<S, P>
where
    S: Clone,
{
    /// Start the background recovery loop on the current Tokio runtime.
    ///
    /// Returns false if the loop was already running.
    pub async fn start<ReqB, ResB>(&self) -> bool
    where
        S: Service<Request<ReqB>, Response = Response<ResB>> + Send + 'static,
        S::Future: Send,
        S::Error: fmt::Display + Send,
        ResB: Body + Send + 'static,
        ResB::Data: Send,
        ResB::Error: fmt::Display + Send,
        ReqB: Default + Send + 'static,
        P: HealthProbe<ReqB> + 'static,
    {
        let mut recovery = self.shared.recovery();
        if recovery.as_ref().is_some_and(RecoveryHandle::is_running) {
            return false;
        }

        *recovery = Some(RecoveryHandle::spawn(
            Arc::clone(&self.shared.pool),
            Arc::clone(&self.shared.config),
            self.inner.clone(),
        ));
        true
    }

    /// Run one recovery pass now, independent of the background loop.
    pub async fn recover_now<ReqB, ResB>(&self) -> RecoveryReport
    where
        S: Service<Request<ReqB>, Response = Response<ResB>>,
        S::Error: fmt::Display,
        ResB: Body,
        ResB::Error: fmt::Display,
        ReqB: Default,
        P: HealthProbe<ReqB>,
    {
        let (_stop, stop_rx) = watch::channel(false);
        let mut recovery = RecoveryLoop::new(
            Arc::clone(&self.shared.pool),
            Arc::clone(&self.shared.config),
            self.inner.clone(),
            stop_rx,
        );
        recovery.tick().await
    }

    /// Send one request through the balancer.
    ///
    /// Equivalent to calling the service on a clone once it is ready.
    pub async fn execute<ReqB, ResB>(
        &self,
        request: Request<ReqB>,
    ) -> Result<Response<ResB>, BalancerError<<S as Service<Request<ReqB>>>::Error>>
    where
        S: Service<Request<ReqB>, Response = Response<ResB>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Send + 'static,
        ReqB: Send + 'static,
        ResB: Send + 'static,
        P: Send + Sync + 'static,
    {
        self.clone().oneshot(request).await
    }
}

impl<S, P> Clone for Balancer<S, P>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

fn on_rejected<P>(config: &BalancerConfig<P>) {
    #[cfg(feature = "tracing")]
    tracing::warn!(balancer = %config.name, "no healthy endpoint, request rejected");

    #[cfg(feature = "metrics")]
    counter!("balancer_calls_total", "balancer" => config.name.clone(), "outcome" => "rejected")
        .increment(1);

    config.emit(|| BalancerEvent::Rejected {
        pattern_name: config.name.clone(),
        timestamp: Instant::now(),
    });
}

fn on_demoted<P>(config: &BalancerConfig<P>, pool: &EndpointPool, endpoint: &Endpoint) {
    let healthy = pool.healthy_count();

    #[cfg(feature = "tracing")]
    tracing::warn!(
        balancer = %config.name,
        endpoint = %endpoint,
        healthy,
        "request failed, endpoint taken out of rotation"
    );

    #[cfg(feature = "metrics")]
    {
        counter!("balancer_transitions_total", "balancer" => config.name.clone(), "to" => "unhealthy")
            .increment(1);
        gauge!("balancer_healthy_endpoints", "balancer" => config.name.clone()).set(healthy as f64);
    }

    config.emit(|| BalancerEvent::Demoted {
        pattern_name: config.name.clone(),
        timestamp: Instant::now(),
        endpoint: endpoint.address().to_string(),
        healthy_remaining: healthy,
    });
}

impl<S, P, ReqB, ResB> Service<Request<ReqB>> for Balancer<S, P>
where
    S: Service<Request<ReqB>, Response = Response<ResB>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResB: Send + 'static,
    P: Send + Sync + 'static,
{
    type Response = Response<ResB>;
    type Error = BalancerError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(BalancerError::NotReady)
    }

    fn call(&mut self, mut req: Request<ReqB>) -> Self::Future {
        let shared = Arc::clone(&self.shared);

        let endpoint = match shared.pool.pick_healthy() {
            Ok(endpoint) => endpoint,
            Err(err) => {
                on_rejected(&shared.config);
                return Box::pin(futures::future::ready(Err(err.into())));
            }
        };

        endpoint.apply_to(&mut req);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            balancer = %shared.config.name,
            endpoint = %endpoint,
            method = %req.method(),
            uri = %req.uri(),
            "dispatching request"
        );

        shared.config.emit(|| BalancerEvent::Dispatched {
            pattern_name: shared.config.name.clone(),
            timestamp: Instant::now(),
            endpoint: endpoint.address().to_string(),
        });

        let fut = self.inner.call(req);

        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    #[cfg(feature = "metrics")]
                    counter!("balancer_calls_total", "balancer" => shared.config.name.clone(), "outcome" => "success")
                        .increment(1);

                    Ok(response)
                }
                Err(source) => {
                    #[cfg(feature = "metrics")]
                    counter!("balancer_calls_total", "balancer" => shared.config.name.clone(), "outcome" => "failure")
                        .increment(1);

                    if shared.pool.demote(&endpoint) {
                        on_demoted(&shared.config, &shared.pool, &endpoint);
                    }

                    Err(BalancerError::Executor {
                        endpoint: endpoint.address().to_string(),
                        source,
                    })
                }
            }
        })
    }
}
