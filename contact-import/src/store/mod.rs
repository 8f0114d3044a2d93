pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ContactRecord, DuplicateLink, ValidatedContact};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Reads failed (connection, SQL or decoding errors)
    #[error("store query error: {0}")]
    Query(String),

    /// Writes failed
    #[error("store write error: {0}")]
    Write(String),

    /// The store's identity constraint rejected an insert
    #[error("contact already exists: {0}")]
    UniqueViolation(String),

    /// Connection pool exhausted or closed
    #[error("store pool exhausted")]
    PoolExhausted,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What a [`ContactStore::commit_batch`] call persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub canonical_inserted: u64,
    pub links_written: u64,
    /// Positions in the `duplicates` argument with no canonical record to link to.
    pub unresolved: Vec<usize>,
}

/// Everything the import pipeline and the exporter need from persistence.
///
/// Identity lookups match on the normalized triple: company name and email
/// compared case-insensitively after trimming, phone number exactly.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn exists_contact(&self, contact: &ValidatedContact) -> StoreResult<bool>;

    /// Inserts all contacts as canonical records, or none of them.
    async fn bulk_insert_canonical(&self, contacts: &[ValidatedContact]) -> StoreResult<u64>;

    async fn find_canonical(&self, contact: &ValidatedContact)
        -> StoreResult<Option<ContactRecord>>;

    async fn insert_duplicate_link(
        &self,
        canonical_id: Option<i64>,
        contact: &ValidatedContact,
    ) -> StoreResult<()>;

    /// Inserts `uniques` as canonical records, then links each of `duplicates`
    /// to the canonical record it resolves to, as one unit of work. On error
    /// nothing from the call is persisted. Duplicates that resolve to nothing
    /// are skipped and reported in [`BatchOutcome::unresolved`].
    async fn commit_batch(
        &self,
        uniques: &[ValidatedContact],
        duplicates: &[ValidatedContact],
    ) -> StoreResult<BatchOutcome>;

    /// Canonical records in ascending id order.
    async fn page_canonical(&self, offset: u64, limit: u64) -> StoreResult<Vec<ContactRecord>>;

    /// Duplicate links in ascending id order.
    async fn page_duplicate_links(&self, offset: u64, limit: u64)
        -> StoreResult<Vec<DuplicateLink>>;
}
