//! Backend endpoints and request rewriting.

use crate::BuildError;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Request, Uri};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of an [`Endpoint`].
///
/// Two endpoints parsed from the same address get different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    fn next() -> Self {
        EndpointId(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct Target {
    id: EndpointId,
    address: String,
    scheme: Scheme,
    authority: Authority,
    path_prefix: String,
}

/// A backend the balancer can route requests to.
///
/// Endpoints are immutable, cheap to clone, and compare by identity: cloning
/// an endpoint yields the same endpoint, parsing the same address twice
/// yields two distinct ones.
///
/// # Examples
///
/// ```rust
/// use tower_balancer::Endpoint;
///
/// let endpoint = Endpoint::parse("http://10.0.0.1:8080/api").unwrap();
/// let mut request = http::Request::get("/users?page=2").body(()).unwrap();
///
/// endpoint.apply_to(&mut request);
/// assert_eq!(request.uri(), "http://10.0.0.1:8080/api/users?page=2");
/// ```
#[derive(Clone)]
pub struct Endpoint {
    target: Arc<Target>,
}

impl Endpoint {
    /// Parse a URL-shaped address such as `https://backend:8443/prefix`.
    ///
    /// The address needs a scheme and a host. Any path becomes a prefix that
    /// is prepended to every request routed to this endpoint.
    pub fn parse(address: impl AsRef<str>) -> Result<Self, BuildError> {
        let raw = address.as_ref();
        let trimmed = raw.trim();
        let invalid = |reason: &str| BuildError::InvalidAddress {
            address: raw.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("address is empty"));
        }

        let uri: Uri = trimmed.parse().map_err(|e: http::uri::InvalidUri| {
            BuildError::InvalidAddress {
                address: raw.to_string(),
                reason: e.to_string(),
            }
        })?;

        let parts = uri.into_parts();
        let scheme = parts.scheme.ok_or_else(|| invalid("missing scheme"))?;
        let authority = parts.authority.ok_or_else(|| invalid("missing host"))?;
        if authority.host().is_empty() {
            return Err(invalid("missing host"));
        }

        let path_prefix = match parts.path_and_query {
            Some(pq) if pq.query().is_some() => {
                return Err(invalid("query strings are not allowed"));
            }
            Some(pq) => pq.path().trim_end_matches('/').to_string(),
            None => String::new(),
        };

        Ok(Endpoint {
            target: Arc::new(Target {
                id: EndpointId::next(),
                address: trimmed.to_string(),
                scheme,
                authority,
                path_prefix,
            }),
        })
    }

    /// Identity of this endpoint.
    pub fn id(&self) -> EndpointId {
        self.target.id
    }

    /// The address this endpoint was parsed from.
    pub fn address(&self) -> &str {
        &self.target.address
    }

    /// Target scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.target.scheme
    }

    /// Target host and optional port.
    pub fn authority(&self) -> &Authority {
        &self.target.authority
    }

    /// Path prefix without a trailing slash; empty when the address had no path.
    pub fn path_prefix(&self) -> &str {
        &self.target.path_prefix
    }

    /// Rewrite a request in place so that it targets this endpoint.
    ///
    /// Scheme and authority are replaced, the path prefix is prepended and the
    /// query is kept. Method, headers and body are not touched.
    pub fn apply_to<B>(&self, request: &mut Request<B>) {
        let path_and_query = self.prefixed(request.uri().path_and_query());
        let mut parts = http::uri::Parts::default();
        parts.scheme = Some(self.target.scheme.clone());
        parts.authority = Some(self.target.authority.clone());
        parts.path_and_query = Some(path_and_query);

        // Scheme, authority and an absolute path always form a valid URI.
        if let Ok(uri) = Uri::from_parts(parts) {
            *request.uri_mut() = uri;
        }
    }

    /// Build an absolute URI on this endpoint for the given path and query.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, http::Error> {
        let pq: PathAndQuery = if path_and_query.starts_with('/') {
            path_and_query.parse()?
        } else {
            format!("/{path_and_query}").parse()?
        };
        let uri = Uri::builder()
            .scheme(self.target.scheme.clone())
            .authority(self.target.authority.clone())
            .path_and_query(self.prefixed(Some(&pq)))
            .build()?;
        Ok(uri)
    }

    fn prefixed(&self, original: Option<&PathAndQuery>) -> PathAndQuery {
        let prefix = &self.target.path_prefix;
        let (path, query) = match original {
            Some(pq) => (pq.path(), pq.query()),
            None => ("/", None),
        };

        let mut joined = String::with_capacity(prefix.len() + path.len() + 1);
        joined.push_str(prefix);
        if !path.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(path);
        if let Some(query) = query {
            joined.push('?');
            joined.push_str(query);
        }

        joined
            .parse()
            .unwrap_or_else(|_| PathAndQuery::from_static("/"))
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.target.id == other.target.id
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target.id.hash(state);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.target.id)
            .field("address", &self.target.address)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target.address)
    }
}
