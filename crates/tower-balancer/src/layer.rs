use crate::config::{BalancerConfig, BalancerConfigBuilder};
use crate::{Balancer, SimpleHealthProbe};
use std::sync::Arc;
use tower_layer::Layer;

/// A Tower layer that spreads requests from an inner request executor across
/// a pool of endpoints.
///
/// Every call to [`Layer::layer`] creates a balancer with its own pool in
/// which all endpoints start healthy. The recovery loop is not started until
/// [`Balancer::start`] is called.
///
/// # Examples
///
/// ```rust
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use http_body_util::Full;
/// use tower::{service_fn, Layer};
/// use tower_balancer::BalancerLayer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let layer = BalancerLayer::builder()
///     .endpoints(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])
///     .build()?;
///
/// let executor = service_fn(|req: Request<String>| async move {
///     assert_eq!(req.uri().port_u16(), Some(8080));
///     Ok::<_, std::io::Error>(Response::new(Full::new(Bytes::from("hello"))))
/// });
///
/// let balancer = layer.layer(executor);
/// balancer.start().await;
///
/// let response = balancer.execute(Request::get("/users").body(String::new())?).await?;
/// assert_eq!(response.status(), 200);
///
/// balancer.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct BalancerLayer<P = SimpleHealthProbe> {
    config: Arc<BalancerConfig<P>>,
}

impl<P> BalancerLayer<P> {
    pub(crate) fn new(config: BalancerConfig<P>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The validated configuration.
    pub fn config(&self) -> &BalancerConfig<P> {
        &self.config
    }

    pub(crate) fn shared_config(&self) -> Arc<BalancerConfig<P>> {
        Arc::clone(&self.config)
    }

    /// Wrap `executor` in a new balancer.
    ///
    /// Same as [`Layer::layer`], without needing the trait in scope.
    pub fn build_service<S>(&self, executor: S) -> Balancer<S, P> {
        Balancer::new(executor, Arc::clone(&self.config))
    }
}

impl BalancerLayer<SimpleHealthProbe> {
    /// Creates a new builder for configuring a balancer layer.
    pub fn builder() -> BalancerConfigBuilder<SimpleHealthProbe> {
        crate::balancer_builder()
    }
}

impl<P> Clone for BalancerLayer<P> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, P> Layer<S> for BalancerLayer<P> {
    type Service = Balancer<S, P>;

    fn layer(&self, service: S) -> Self::Service {
        self.build_service(service)
    }
}
