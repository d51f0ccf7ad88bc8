//! Repository interfaces for tenant document collections
//!
//! The driver only ever talks to the store through [`DocumentStore`]; a
//! connected handle is injected and its lifecycle is owned by the caller.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::document::{Document, DocumentId, ScanFilter, UpdateOperation};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Bulk write of {attempted} operations failed: {message}")]
    BulkWrite { attempted: usize, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn bulk_write(attempted: usize, message: impl Into<String>) -> Self {
        Self::BulkWrite {
            attempted,
            message: message.into(),
        }
    }
}

/// Acknowledgement of a bulk write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteAck {
    pub matched: usize,
    pub modified: usize,
    /// Matched documents left untouched, marker included, because a field
    /// path did not resolve in the stored payload
    pub rejected: Vec<DocumentId>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Count documents of `tenant_id` whose migration marker is unset
    async fn count_unmigrated(&self, collection: &str, tenant_id: &str) -> Result<u64, StoreError>;

    /// Fetch unmigrated documents with `id > filter.after`, ascending by id, at most `filter.limit`
    async fn find_unmigrated(
        &self,
        collection: &str,
        filter: &ScanFilter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Apply single-document partial updates in one request.
    ///
    /// Each operation is all-or-nothing: when any of its fields cannot be
    /// applied the document keeps its payload and marker and is listed in
    /// [`BulkWriteAck::rejected`].
    async fn bulk_update(
        &self,
        collection: &str,
        operations: &[UpdateOperation],
    ) -> Result<BulkWriteAck, StoreError>;
}
