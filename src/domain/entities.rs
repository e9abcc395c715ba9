//! Domain Entities - Core business objects
//!
//! A registered domain maps to exactly one backend. These types carry no
//! storage or transport concerns.

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::Scheme;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One stored domain-to-backend mapping.
///
/// Field names on the wire follow the management API format
/// (`ip`, `protocol`). Timestamps are unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRecord {
    /// Unique key, matched exactly against the routing key
    pub domain: String,
    /// Backend host (IP or name)
    #[serde(rename = "ip")]
    pub address: String,
    /// Backend port, never zero
    pub port: u16,
    /// Protocol used to reach the backend
    #[serde(rename = "protocol")]
    pub scheme: Scheme,
    /// Set once at insertion
    pub created_at: u64,
    /// Refreshed on every successful mutation
    pub updated_at: u64,
}

impl BackendRecord {
    /// `address:port`, bracketing bare IPv6 addresses.
    pub fn authority(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Everything needed to register a new domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub domain: String,
    pub address: String,
    pub port: u16,
    /// `None` means the registry default (`http`)
    pub scheme: Option<Scheme>,
}

impl BackendSpec {
    pub fn new(domain: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            domain: domain.into(),
            address: address.into(),
            port,
            scheme: None,
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("domain", &self.domain)?;
        require_text("ip", &self.address)?;
        require_port(self.port)
    }
}

/// New backend values for an existing domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUpdate {
    pub address: String,
    pub port: u16,
    /// `None` keeps whatever scheme is currently stored
    pub scheme: Option<Scheme>,
}

impl BackendUpdate {
    pub fn new(address: impl Into<String>, port: u16, scheme: Option<Scheme>) -> Self {
        Self {
            address: address.into(),
            port,
            scheme,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("ip", &self.address)?;
        require_port(self.port)
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

fn require_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        Err(ValidationError::MissingField("port"))
    } else {
        Ok(())
    }
}

/// Current wall-clock time in unix epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
