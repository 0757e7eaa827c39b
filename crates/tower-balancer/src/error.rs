use thiserror::Error;

/// Errors returned by the [`Balancer`](crate::Balancer) service.
#[derive(Debug, Error)]
pub enum BalancerError<E> {
    /// Every endpoint is currently unhealthy; the executor was not called.
    #[error("no healthy endpoint available")]
    NoHealthyEndpoint,

    /// The request executor failed. The endpoint has already been demoted.
    #[error("request to {endpoint} failed: {source}")]
    Executor {
        /// Address of the endpoint the request was sent to.
        endpoint: String,
        /// The error returned by the executor.
        source: E,
    },

    /// The executor failed while reporting readiness. No endpoint was picked.
    #[error("request executor not ready: {0}")]
    NotReady(#[source] E),
}

impl<E> BalancerError<E> {
    /// Returns true if the call was rejected because no endpoint was healthy.
    pub fn is_no_healthy_endpoint(&self) -> bool {
        matches!(self, BalancerError::NoHealthyEndpoint)
    }

    /// Returns true if the executor returned an error.
    pub fn is_executor(&self) -> bool {
        matches!(self, BalancerError::Executor { .. })
    }

    /// Returns true if the executor failed its readiness check.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, BalancerError::NotReady(_))
    }

    /// Address of the endpoint that failed, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            BalancerError::Executor { endpoint, .. } => Some(endpoint),
            BalancerError::NoHealthyEndpoint | BalancerError::NotReady(_) => None,
        }
    }

    /// Returns the executor error if present.
    pub fn into_executor_error(self) -> Option<E> {
        match self {
            BalancerError::Executor { source, .. } | BalancerError::NotReady(source) => Some(source),
            BalancerError::NoHealthyEndpoint => None,
        }
    }
}

/// The pool has no healthy endpoint to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no healthy endpoint available")]
pub struct NoHealthyEndpoint;

impl<E> From<NoHealthyEndpoint> for BalancerError<E> {
    fn from(_: NoHealthyEndpoint) -> Self {
        BalancerError::NoHealthyEndpoint
    }
}

/// Errors raised while building a balancer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// An endpoint address could not be parsed into scheme and host.
    #[error("invalid endpoint address {address:?}: {reason}")]
    InvalidAddress {
        /// The address as given.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No endpoints were configured.
    #[error("at least one endpoint is required")]
    NoEndpoints,

    /// The probe interval was zero.
    #[error("probe interval must be greater than zero")]
    InvalidProbeInterval,
}
