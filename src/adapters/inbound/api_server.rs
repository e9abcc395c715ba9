//! Management API
//!
//! CRUD over the domain registry, mounted under `/api`. Every route passes
//! two stages before reaching its handler:
//! 1. Host restriction: the request host (port stripped) must equal the
//!    configured API domain, else 403
//! 2. Bearer authentication against the configured API key, else 401

use crate::application::Dispatcher;
use crate::domain::entities::{BackendRecord, BackendSpec, BackendUpdate};
use crate::domain::errors::{RegistryError, ValidationError};
use crate::domain::ports::Registry;
use crate::domain::value_objects::{RoutingKey, Scheme};
use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Creation request for one domain.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDomainRequest {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub ip: String,
    /// Wider than `u16` so out-of-range values are reported as validation
    /// errors instead of parse errors.
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl CreateDomainRequest {
    pub fn into_spec(self) -> Result<BackendSpec, ValidationError> {
        let spec = BackendSpec {
            port: port_in_range(self.port)?,
            scheme: Scheme::parse_optional(self.protocol.as_deref())?,
            domain: self.domain,
            address: self.ip,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Replacement backend values for an existing domain.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDomainRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl UpdateDomainRequest {
    pub fn into_update(self) -> Result<BackendUpdate, ValidationError> {
        let update = BackendUpdate::new(
            self.ip,
            port_in_range(self.port)?,
            Scheme::parse_optional(self.protocol.as_deref())?,
        );
        update.validate()?;
        Ok(update)
    }
}

/// Bulk creation accepts a bare array or `{"domains": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BulkCreateRequest {
    List(Vec<CreateDomainRequest>),
    Wrapped { domains: Vec<CreateDomainRequest> },
}

impl BulkCreateRequest {
    fn into_entries(self) -> Vec<CreateDomainRequest> {
        match self {
            Self::List(entries) | Self::Wrapped { domains: entries } => entries,
        }
    }
}

/// Zero passes through so it is reported as a missing port.
fn port_in_range(port: i64) -> Result<u16, ValidationError> {
    u16::try_from(port).map_err(|_| ValidationError::InvalidField {
        field: "port",
        reason: format!("{port} is outside 1-65535"),
    })
}

/// Management API failure, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: API access restricted to specific domain")]
    Forbidden,
    #[error("domain not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(e) => e.into(),
            RegistryError::DuplicateKey(domain) => {
                Self::Conflict(format!("domain already exists: {domain}"))
            }
            RegistryError::NotFound(_) => Self::NotFound,
            RegistryError::Storage(e) => {
                tracing::error!("registry storage error: {}", e);
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Shared state for management handlers and their guards.
#[derive(Clone)]
pub struct ApiState {
    registry: Arc<dyn Registry>,
    api_key: Arc<str>,
    api_domain: Arc<str>,
}

impl ApiState {
    pub fn new(registry: Arc<dyn Registry>, api_key: &str, api_domain: &str) -> Self {
        Self {
            registry,
            api_key: Arc::from(api_key),
            api_domain: Arc::from(api_domain),
        }
    }
}

/// Management routes, to be nested under `/api`.
///
/// Guards are attached with `route_layer`, so paths that match no route
/// here fall through to the outer router's fallback untouched.
pub fn router<S>(state: ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/config/bulk", post(bulk_create_handler))
        .route("/config", get(list_handler).post(create_handler))
        .route(
            "/config/:domain",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), restrict_host))
        .with_state(state)
}

// Guards

async fn restrict_host(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let allowed = Dispatcher::request_host(&req)
        .and_then(RoutingKey::from_host)
        .is_some_and(|key| key.as_str() == &*state.api_domain);

    if !allowed {
        tracing::warn!(
            "management request rejected: host {:?} is not the API domain",
            Dispatcher::request_host(&req)
        );
        return ApiError::Forbidden.into_response();
    }
    next.run(req).await
}

async fn require_api_key(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if !bool::from(presented.as_bytes().ct_eq(state.api_key.as_bytes())) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

// Handlers

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

async fn list_handler(State(state): State<ApiState>) -> Result<Json<Vec<BackendRecord>>, ApiError> {
    Ok(Json(state.registry.list_all().await?))
}

async fn get_handler(
    State(state): State<ApiState>,
    Path(domain): Path<String>,
) -> Result<Json<BackendRecord>, ApiError> {
    state
        .registry
        .lookup(&domain)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn create_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<BackendRecord>), ApiError> {
    let spec = parse_body::<CreateDomainRequest>(&body)?.into_spec()?;
    let record = state.registry.insert(spec).await?;

    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_handler(
    State(state): State<ApiState>,
    Path(domain): Path<String>,
    body: Bytes,
) -> Result<Json<BackendRecord>, ApiError> {
    let update = parse_body::<UpdateDomainRequest>(&body)?.into_update()?;
    let record = state
        .registry
        .update(&domain, update)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(record))
}

async fn delete_handler(
    State(state): State<ApiState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_create_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<BackendRecord>>), ApiError> {
    let entries = serde_json::from_slice::<BulkCreateRequest>(&body)
        .map_err(|_| {
            ApiError::BadRequest(
                "invalid request body: expected array of domains or object with 'domains' field"
                    .to_string(),
            )
        })?
        .into_entries();

    if entries.is_empty() {
        return Err(ValidationError::EmptyBatch.into());
    }

    let specs = entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry.into_spec().map_err(|e| e.at_index(i)))
        .collect::<Result<Vec<_>, _>>()?;

    let records = state.registry.bulk_insert(specs).await?;
    Ok((StatusCode::CREATED, Json(records)))
}
