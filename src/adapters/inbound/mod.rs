mod api_server;
mod http_server;

pub use api_server::{ApiError, ApiState, CreateDomainRequest, UpdateDomainRequest};
pub use http_server::{build_router, HttpServer};
