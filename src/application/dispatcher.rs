//! Dispatcher - Host-based routing use case
//!
//! Turns one inbound request into one outbound proxied request:
//! 1. Derives the routing key from the request host
//! 2. Looks the key up in the registry
//! 3. Forwards the request to the resolved backend and streams the
//!    response back unmodified
//!
//! The dispatcher never mutates the registry and holds no lock across the
//! backend round trip.

use crate::domain::entities::BackendRecord;
use crate::domain::errors::RegistryError;
use crate::domain::ports::Registry;
use crate::domain::value_objects::{RoutingKey, Scheme};
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::{self, Authority, PathAndQuery, Uri};
use axum::http::{Request, Response, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Headers that only mean something on a single transport leg.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Outbound HTTP client shared by every proxied request.
pub type BackendClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Why a request could not be proxied.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("request has no host")]
    MissingHost,
    #[error("no route for domain {0}")]
    NoRoute(String),
    #[error("registry lookup failed: {0}")]
    RoutingInternalError(#[source] RegistryError),
    #[error("invalid backend configuration for {domain}: {reason}")]
    InvalidBackendConfig { domain: String, reason: String },
    #[error("backend {target} unreachable: {source}")]
    BackendUnreachable {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

/// Resolved outbound target for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    domain: String,
    locator: String,
    scheme: uri::Scheme,
    authority: Authority,
}

impl BackendTarget {
    /// Build `scheme://address:port` from a registry record.
    pub fn from_record(record: &BackendRecord) -> Result<Self, RouteError> {
        let locator = format!("{}://{}", record.scheme, record.authority());
        let invalid = |reason: String| RouteError::InvalidBackendConfig {
            domain: record.domain.clone(),
            reason,
        };

        let authority =
            Authority::try_from(record.authority().as_str()).map_err(|e| invalid(e.to_string()))?;

        // The address must contribute a host and nothing else.
        if authority.host().is_empty()
            || authority.as_str().contains('@')
            || authority.port_u16() != Some(record.port)
        {
            return Err(invalid(format!("{locator} is not a valid backend locator")));
        }

        let scheme = match record.scheme {
            Scheme::Http => uri::Scheme::HTTP,
            Scheme::Https => uri::Scheme::HTTPS,
        };

        Ok(Self {
            domain: record.domain.clone(),
            locator,
            scheme,
            authority,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The target as configured, e.g. `http://10.1.1.1:80`.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Outbound URI for an inbound request target.
    ///
    /// The path and query are reused as received, byte for byte: nothing
    /// is decoded, re-encoded or normalized. A missing target becomes `/`.
    pub fn uri_for(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, RouteError> {
        let path_and_query = path_and_query
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| RouteError::InvalidBackendConfig {
                domain: self.domain.clone(),
                reason: e.to_string(),
            })
    }
}

/// Host-header based request dispatcher.
pub struct Dispatcher {
    registry: Arc<dyn Registry>,
    client: BackendClient,
}

impl Dispatcher {
    /// Create a dispatcher with its own outbound client.
    ///
    /// The client speaks HTTP/1.1 to `http` and `https` backends and never
    /// follows redirects: the backend's response, redirects included, goes
    /// back to the caller untouched.
    pub fn new(registry: Arc<dyn Registry>, connect_timeout: Duration) -> anyhow::Result<Self> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self::with_client(registry, client))
    }

    pub fn with_client(registry: Arc<dyn Registry>, client: BackendClient) -> Self {
        Self { registry, client }
    }

    /// Host of an inbound request: the `Host` header, else the URI authority.
    pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
        req.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()))
    }

    /// Look up the backend for a host value.
    pub async fn resolve(&self, host: Option<&str>) -> Result<BackendTarget, RouteError> {
        let key = host
            .and_then(RoutingKey::from_host)
            .ok_or(RouteError::MissingHost)?;

        let record = self
            .registry
            .lookup(key.as_str())
            .await
            .map_err(RouteError::RoutingInternalError)?
            .ok_or_else(|| RouteError::NoRoute(key.to_string()))?;

        let target = BackendTarget::from_record(&record)?;
        tracing::debug!("resolved {} -> {}", key, target.locator());
        Ok(target)
    }

    /// Resolve and forward in one step.
    pub async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, RouteError> {
        let target = self.resolve(Self::request_host(&req)).await?;
        self.forward(&target, req, client_addr).await
    }

    /// Send `req` to `target` and stream the backend's response back.
    ///
    /// Method, raw path, query and headers are preserved; only the
    /// destination, the `Host` header and hop-by-hop fields change.
    /// Dropping the returned body closes the backend connection.
    pub async fn forward(
        &self,
        target: &BackendTarget,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, RouteError> {
        let (parts, body) = req.into_parts();
        let uri = target.uri_for(parts.uri.path_and_query())?;

        tracing::debug!("proxying {} {} -> {}", parts.method, uri, target.locator());

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.version_mut() = Version::HTTP_11;
        *outbound.headers_mut() = outbound_headers(&parts.headers, client_addr);

        let upstream =
            self.client
                .request(outbound)
                .await
                .map_err(|source| RouteError::BackendUnreachable {
                    target: target.locator().to_string(),
                    source,
                })?;

        let (mut parts, incoming) = upstream.into_parts();
        parts.headers = strip_hop_by_hop(&parts.headers);
        Ok(Response::from_parts(parts, Body::new(incoming)))
    }
}

/// Names listed in `Connection` are hop-by-hop too.
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

/// Copy `headers`, dropping every hop-by-hop field.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) || listed.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers for the outbound leg.
///
/// The inbound `Host` is dropped so the backend sees its own authority,
/// and the client address is appended to `X-Forwarded-For`.
pub fn outbound_headers(inbound: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);
    headers.remove(header::HOST);

    if let Some(addr) = client_addr {
        let client_ip = addr.ip().to_string();
        let prior: Vec<&str> = inbound
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let forwarded = if prior.is_empty() {
            client_ip
        } else {
            format!("{}, {}", prior.join(", "), client_ip)
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    headers
}
