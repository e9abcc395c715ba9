//! Domain error taxonomy.

use std::error::Error as StdError;

/// A creation or update request failed field validation.
///
/// Raised before the registry is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("no domains provided")]
    EmptyBatch,
    #[error("domain at index {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Attach the position of the offending entry within a batch.
    pub fn at_index(self, index: usize) -> Self {
        Self::AtIndex {
            index,
            source: Box::new(self),
        }
    }
}

/// Errors reported by a [`Registry`](crate::domain::ports::Registry).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("domain already exists: {0}")]
    DuplicateKey(String),
    #[error("domain not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn StdError + Send + Sync>),
}

impl RegistryError {
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Storage(err.into())
    }
}
