//! HTTP Server - Inbound adapter
//!
//! Single listener carrying every surface:
//! - `/api/...` management routes
//! - `/health` and `/whoami` diagnostics
//! - everything else falls through to the [`Dispatcher`]

use crate::adapters::inbound::api_server::{self, ApiState};
use crate::application::{Dispatcher, RouteError};
use crate::infrastructure::ShutdownController;
use axum::{
    body::Body,
    extract::{ConnectInfo, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Upper bound for the `/whoami` `wait` parameter.
const MAX_WHOAMI_WAIT: Duration = Duration::from_secs(30);

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RouteError::MissingHost => (StatusCode::BAD_REQUEST, "Missing Host header"),
            RouteError::NoRoute(_) => (StatusCode::NOT_FOUND, "Domain not found"),
            RouteError::RoutingInternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            RouteError::InvalidBackendConfig { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid target configuration")
            }
            RouteError::BackendUnreachable { .. } => (StatusCode::BAD_GATEWAY, "Bad gateway"),
        };

        if status.is_server_error() {
            tracing::error!("proxy error: {}", self);
        } else {
            tracing::warn!("proxy rejected request: {}", self);
        }

        (status, message).into_response()
    }
}

#[derive(Clone)]
struct ProxyState {
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownController,
}

/// Assemble the full application router.
pub fn build_router(
    dispatcher: Arc<Dispatcher>,
    api: ApiState,
    shutdown: ShutdownController,
) -> Router {
    let state = ProxyState {
        dispatcher,
        shutdown: shutdown.clone(),
    };

    Router::new()
        .nest("/api", api_server::router(api))
        .route("/health", get(health_handler))
        .route("/whoami", get(whoami_handler))
        .fallback(proxy_handler)
        .with_state(state)
        .layer(middleware::from_fn_with_state(shutdown, track_in_flight))
        .layer(TraceLayer::new_for_http())
}

/// Count every request as in flight while its handler runs.
async fn track_in_flight(
    State(shutdown): State<ShutdownController>,
    req: Request,
    next: Next,
) -> Response {
    let _guard = shutdown.request_guard();
    next.run(req).await
}

fn client_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

async fn proxy_handler(State(state): State<ProxyState>, req: Request) -> Response {
    let client = client_addr(&req);
    let guard = state.shutdown.request_guard();

    match state.dispatcher.dispatch(req, client).await {
        Ok(response) => {
            // The backend body is still streaming; stay in flight until it ends.
            let (parts, body) = response.into_parts();
            let body = body.into_data_stream().map(move |chunk| {
                let _in_flight = &guard;
                chunk
            });
            Response::from_parts(parts, Body::from_stream(body))
        }
        Err(e) => e.into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct WhoamiParams {
    wait: Option<String>,
}

/// Plain-text echo of who served the request and what it looked like.
async fn whoami_handler(Query(params): Query<WhoamiParams>, req: Request) -> String {
    if let Some(wait) = params.wait.as_deref().filter(|w| !w.is_empty()) {
        match parse_wait(wait) {
            Some(delay) => {
                tracing::debug!("whoami: sleeping for {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            None => tracing::warn!("whoami: invalid wait duration {:?}", wait),
        }
    }

    let mut out = String::new();
    out.push_str(&format!("Hostname: {}\n", hostname()));
    if let Some(addr) = client_addr(&req) {
        out.push_str(&format!("RemoteAddr: {}\n", addr));
    }
    out.push_str(&format!(
        "{} {} {:?}\n",
        req.method(),
        req.uri(),
        req.version()
    ));
    for (name, value) in req.headers() {
        out.push_str(&format!(
            "{}: {}\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    out
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parse durations like `250ms`, `1.5s` or `2m`, capped at [`MAX_WHOAMI_WAIT`].
fn parse_wait(value: &str) -> Option<Duration> {
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let seconds = match unit {
        "ns" => number / 1e9,
        "us" | "µs" => number / 1e6,
        "ms" => number / 1e3,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };

    let delay = Duration::try_from_secs_f64(seconds).ok()?;
    Some(delay.min(MAX_WHOAMI_WAIT))
}

/// HTTP listener with graceful shutdown.
pub struct HttpServer {
    listen_addr: String,
    router: Router,
}

impl HttpServer {
    pub fn new(listen_addr: String, router: Router) -> Self {
        Self {
            listen_addr,
            router,
        }
    }

    /// Bind and serve until `shutdown` fires.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(
        self,
        shutdown: ShutdownController,
        drain_timeout: Duration,
    ) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown, drain_timeout).await
    }

    /// Serve on an already bound listener.
    ///
    /// Once shutdown starts no new connections are accepted; open
    /// connections get up to `drain_timeout` to finish their responses
    /// before they are dropped.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: ShutdownController,
        drain_timeout: Duration,
    ) -> anyhow::Result<()> {
        let signal = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait_for_shutdown().await }
        };

        let server = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .into_future();
        tokio::pin!(server);

        tokio::select! {
            res = server.as_mut() => return Ok(res?),
            _ = shutdown.wait_for_shutdown() => {}
        }

        match tokio::time::timeout(drain_timeout, server).await {
            Ok(res) => {
                res?;
                tracing::info!("all in-flight requests drained");
            }
            Err(_) => {
                tracing::warn!(
                    "dropping {} in-flight requests after drain timeout",
                    shutdown.in_flight()
                );
            }
        }

        Ok(())
    }
}
