//! Health probes used by the recovery loop.

use crate::Endpoint;
use bytes::Bytes;
use http::{Method, Request, Response};

/// Decides whether an unhealthy endpoint has recovered.
///
/// A probe is consulted twice for every endpoint it checks:
///
/// 1. With `response` set to `None`, to prepare `request` (method, path,
///    headers). Returning `false` skips the endpoint for this round.
/// 2. With the buffered response, to judge it. Returning `true` promotes the
///    endpoint back into rotation.
///
/// If the request never produced a response (connection refused, body read
/// failure) the endpoint stays unhealthy and the probe is not asked to judge.
///
/// # Examples
///
/// Using a closure (via blanket impl):
///
/// ```rust
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use tower_balancer::{Endpoint, HealthProbe};
///
/// let probe = |endpoint: &Endpoint,
///              request: &mut Request<String>,
///              response: Option<&Response<Bytes>>| match response {
///     None => match endpoint.uri_for("/ready") {
///         Ok(uri) => {
///             *request.uri_mut() = uri;
///             true
///         }
///         Err(_) => false,
///     },
///     Some(response) => response.status() == 204,
/// };
///
/// fn assert_probe<P: HealthProbe<String>>(_: &P) {}
/// assert_probe(&probe);
/// ```
pub trait HealthProbe<B>: Send + Sync {
    /// Prepare (`response` is `None`) or judge (`response` is `Some`) a probe.
    fn check(
        &self,
        endpoint: &Endpoint,
        request: &mut Request<B>,
        response: Option<&Response<Bytes>>,
    ) -> bool;
}

impl<B, F> HealthProbe<B> for F
where
    F: Fn(&Endpoint, &mut Request<B>, Option<&Response<Bytes>>) -> bool + Send + Sync,
{
    fn check(
        &self,
        endpoint: &Endpoint,
        request: &mut Request<B>,
        response: Option<&Response<Bytes>>,
    ) -> bool {
        self(endpoint, request, response)
    }
}

/// Probe that requests a fixed path and expects a 2xx answer.
///
/// When an expected body is configured, the response body (trimmed of
/// surrounding whitespace) must also start with it, so `"ok"` accepts
/// `"ok"` and `"ok\n"` but rejects `"not ok"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleHealthProbe {
    method: Method,
    path: String,
    expected_body: String,
}

impl SimpleHealthProbe {
    /// Create a probe sending `method path` and expecting `expected_body`.
    ///
    /// An empty `expected_body` accepts any 2xx response.
    pub fn new(method: Method, path: impl Into<String>, expected_body: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            expected_body: expected_body.into(),
        }
    }

    /// Probe request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Probe request path, relative to the endpoint's prefix.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Body the endpoint must answer with.
    pub fn expected_body(&self) -> &str {
        &self.expected_body
    }

    fn body_matches(&self, body: &[u8]) -> bool {
        if self.expected_body.is_empty() {
            return true;
        }
        String::from_utf8_lossy(body)
            .trim()
            .starts_with(self.expected_body.as_str())
    }
}

impl Default for SimpleHealthProbe {
    /// `GET /healthz` expecting `ok`.
    fn default() -> Self {
        Self::new(Method::GET, "/healthz", "ok")
    }
}

impl<B> HealthProbe<B> for SimpleHealthProbe {
    fn check(
        &self,
        endpoint: &Endpoint,
        request: &mut Request<B>,
        response: Option<&Response<Bytes>>,
    ) -> bool {
        match response {
            None => match endpoint.uri_for(&self.path) {
                Ok(uri) => {
                    *request.method_mut() = self.method.clone();
                    *request.uri_mut() = uri;
                    true
                }
                Err(_) => false,
            },
            Some(response) => {
                response.status().is_success() && self.body_matches(response.body())
            }
        }
    }
}
