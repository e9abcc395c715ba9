//! Domain Layer
//!
//! Entities, value objects, errors and ports. No I/O lives here.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod value_objects;

pub use entities::{BackendRecord, BackendSpec, BackendUpdate};
pub use errors::{RegistryError, ValidationError};
pub use value_objects::{RoutingKey, Scheme};
