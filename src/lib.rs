//! domain-proxy Library
//!
//! Host-header reverse proxy backed by a persistent domain registry.
//! This module exposes the components for the binary and for integration
//! tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{build_router, ApiState, HttpServer};
pub use adapters::outbound::SqliteRegistry;
pub use application::{Dispatcher, RouteError};
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{BackendRecord, BackendSpec, BackendUpdate};
pub use domain::errors::{RegistryError, ValidationError};
pub use domain::ports::Registry;
pub use domain::value_objects::{RoutingKey, Scheme};
pub use infrastructure::ShutdownController;
