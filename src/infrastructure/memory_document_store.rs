//! In-memory document store
//!
//! Honors the same contract as the SQLite adapter and can be told to fail
//! upcoming bulk writes or scans, which is how failure policies are exercised.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::document::{
    Document, DocumentId, ScanFilter, UpdateOperation, apply_field_update,
};
use crate::domain::repositories::{BulkWriteAck, DocumentStore, StoreError};

type Collection = BTreeMap<DocumentId, Document>;

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    failing_bulk_writes: AtomicUsize,
    failing_scans: AtomicUsize,
    bulk_write_calls: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, collection: &str, document: Document) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(document.id.clone(), document);
    }

    pub async fn insert_many(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        for document in documents {
            target.insert(document.id.clone(), document);
        }
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(&DocumentId::new(id)))
            .cloned()
    }

    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `count` bulk writes fail without applying anything
    pub fn fail_next_bulk_writes(&self, count: usize) {
        self.failing_bulk_writes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` count/find calls fail
    pub fn fail_next_scans(&self, count: usize) {
        self.failing_scans.store(count, Ordering::SeqCst);
    }

    pub fn bulk_write_calls(&self) -> usize {
        self.bulk_write_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn count_unmigrated(&self, collection: &str, tenant_id: &str) -> Result<u64, StoreError> {
        if Self::take_failure(&self.failing_scans) {
            return Err(StoreError::Query("injected count failure".to_string()));
        }
        let collections = self.collections.read().await;
        let count = collections.get(collection).map_or(0, |c| {
            c.values()
                .filter(|d| d.tenant_id == tenant_id && !d.migrated.is_set())
                .count()
        });
        Ok(count as u64)
    }

    async fn find_unmigrated(
        &self,
        collection: &str,
        filter: &ScanFilter,
    ) -> Result<Vec<Document>, StoreError> {
        if Self::take_failure(&self.failing_scans) {
            return Err(StoreError::Query("injected find failure".to_string()));
        }
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let lower = filter
            .after
            .clone()
            .map_or(Bound::Unbounded, Bound::Excluded);
        Ok(documents
            .range((lower, Bound::Unbounded))
            .map(|(_, d)| d)
            .filter(|d| d.tenant_id == filter.tenant_id && !d.migrated.is_set())
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn bulk_update(
        &self,
        collection: &str,
        operations: &[UpdateOperation],
    ) -> Result<BulkWriteAck, StoreError> {
        self.bulk_write_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_bulk_writes) {
            return Err(StoreError::bulk_write(
                operations.len(),
                "injected bulk write failure",
            ));
        }

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        let mut ack = BulkWriteAck::default();
        for op in operations {
            let Some(document) = documents.get_mut(&op.id) else {
                continue;
            };
            ack.matched += 1;
            if op.changed() {
                let updated = document.data.as_ref().and_then(|payload| {
                    let mut updated = payload.clone();
                    let applied = op
                        .set_fields
                        .iter()
                        .all(|(field, value)| apply_field_update(&mut updated, field, value));
                    applied.then_some(updated)
                });
                let Some(updated) = updated else {
                    warn!("Rejected update for document {}: field path not found", op.id);
                    ack.rejected.push(op.id.clone());
                    continue;
                };
                document.data = Some(updated);
            }
            document.migrated = op.marker;
            ack.modified += 1;
        }
        Ok(ack)
    }
}
