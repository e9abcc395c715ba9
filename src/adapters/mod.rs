//! Adapters - Inbound and outbound ports implementations

pub mod inbound;
pub mod outbound;
