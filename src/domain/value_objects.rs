//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol used to reach a backend.
///
/// Only these two values may ever be stored in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Parse a caller-supplied scheme.
    ///
    /// An absent or empty value means "not specified" and yields `None`,
    /// leaving the default (on insert) or the stored value (on update) to
    /// the registry. Matching is ASCII case-insensitive.
    pub fn parse_optional(value: Option<&str>) -> Result<Option<Self>, ValidationError> {
        let value = match value.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(v) => v,
        };

        if value.eq_ignore_ascii_case("http") {
            Ok(Some(Self::Http))
        } else if value.eq_ignore_ascii_case("https") {
            Ok(Some(Self::Https))
        } else {
            Err(ValidationError::InvalidField {
                field: "protocol",
                reason: format!("unsupported protocol {value:?}, expected http or https"),
            })
        }
    }

    /// Decode a value read back from storage.
    ///
    /// Rows written before a default existed may carry an empty value;
    /// those read as `http`. Anything else unrecognized is `None`.
    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "" | "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized domain name used to query the registry.
///
/// Matching is exact and case-sensitive. The only normalization applied
/// to the inbound host is removal of a trailing `:port`:
///
/// - `[v6]` / `[v6]:port` keep the bracketed literal, brackets included.
/// - otherwise the part after the last colon is removed only when it is
///   all ASCII digits (an empty port counts).
/// - an unbracketed host with several colons is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Derive the routing key from a host value.
    ///
    /// Returns `None` when the host is empty or nothing is left once the
    /// port has been removed.
    ///
    /// # Examples
    /// ```
    /// use domain_proxy::domain::value_objects::RoutingKey;
    ///
    /// let key = RoutingKey::from_host("example.com:8443").unwrap();
    /// assert_eq!(key.as_str(), "example.com");
    /// assert!(RoutingKey::from_host("").is_none());
    /// ```
    pub fn from_host(host: &str) -> Option<Self> {
        let key = strip_port(host);
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_port(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => {
                let (literal, rest) = host.split_at(end + 1);
                match rest.strip_prefix(':') {
                    Some(port) if is_port(port) => literal,
                    None if rest.is_empty() => literal,
                    _ => host,
                }
            }
            None => host,
        };
    }

    match host.rfind(':') {
        Some(idx) if host[..idx].contains(':') => host,
        Some(idx) if is_port(&host[idx + 1..]) => &host[..idx],
        _ => host,
    }
}
