//! Registry Port
//!
//! Defines the interface to the durable domain -> backend mapping store.
//! The dispatcher only reads through it; the management API also mutates.

use crate::domain::entities::{BackendRecord, BackendSpec, BackendUpdate};
use crate::domain::errors::RegistryError;
use async_trait::async_trait;

/// Durable, uniquely keyed store of [`BackendRecord`]s.
///
/// Every operation is individually atomic and `bulk_insert` is atomic as a
/// whole: a concurrent `lookup` never observes half of a batch. Storage
/// failures surface as [`RegistryError::Storage`], never as "absent".
#[async_trait]
pub trait Registry: Send + Sync {
    /// Point lookup by exact domain.
    async fn lookup(&self, domain: &str) -> Result<Option<BackendRecord>, RegistryError>;

    /// All records ordered by domain.
    async fn list_all(&self) -> Result<Vec<BackendRecord>, RegistryError>;

    /// Register a new domain.
    ///
    /// Fails with `DuplicateKey` if the domain is already present; the
    /// existing record is left untouched. A missing scheme becomes `http`.
    async fn insert(&self, spec: BackendSpec) -> Result<BackendRecord, RegistryError>;

    /// Replace the backend of an existing domain.
    ///
    /// Returns `Ok(None)` when the domain does not exist. A missing scheme
    /// keeps the stored one.
    async fn update(
        &self,
        domain: &str,
        update: BackendUpdate,
    ) -> Result<Option<BackendRecord>, RegistryError>;

    /// Remove a domain, failing with `NotFound` if it does not exist.
    async fn delete(&self, domain: &str) -> Result<(), RegistryError>;

    /// Register many domains, all or nothing.
    ///
    /// Every entry is validated before anything is written. A duplicate,
    /// against stored data or within the batch, aborts the whole batch.
    async fn bulk_insert(&self, specs: Vec<BackendSpec>) -> Result<Vec<BackendRecord>, RegistryError>;
}
