//! Application Layer
//!
//! Use cases that orchestrate the domain ports.

mod dispatcher;

pub use dispatcher::{outbound_headers, strip_hop_by_hop, BackendTarget, Dispatcher, RouteError};
