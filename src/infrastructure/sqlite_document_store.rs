//! SQLite-backed document store
//!
//! Documents of every collection share one `documents` table keyed by
//! `(collection, id)`. Payloads are stored as JSON text; the migration marker
//! is a nullable integer (`NULL` unset, `0` unchanged, `1` rewritten).

#![allow(clippy::uninlined_format_args)]

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::warn;

use crate::domain::document::{
    Document, DocumentId, MigrationMarker, ScanFilter, UpdateOperation, apply_field_update,
};
use crate::domain::repositories::{BulkWriteAck, DocumentStore, StoreError};

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: Arc<SqlitePool>,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Insert or replace a document
    pub async fn insert_document(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<(), StoreError> {
        let data = document
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents (collection, id, tenant_id, data, migrated)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(document.id.as_str())
        .bind(&document.tenant_id)
        .bind(data)
        .bind(document.migrated.as_flag())
        .execute(&*self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    /// Seed many documents at once
    pub async fn insert_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<(), StoreError> {
        for document in documents {
            self.insert_document(collection, document).await?;
        }
        Ok(())
    }

    pub async fn get_document(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, data, migrated
            FROM documents
            WHERE collection = ? AND id = ?
            "#,
        )
        .bind(collection)
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(query_error)?;

        row.map(|row| document_from_row(&row)).transpose()
    }
}

fn query_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(error.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StoreError> {
    let id: String = row.try_get("id").map_err(query_error)?;
    let tenant_id: String = row.try_get("tenant_id").map_err(query_error)?;
    let data: Option<String> = row.try_get("data").map_err(query_error)?;
    let migrated: Option<bool> = row.try_get("migrated").map_err(query_error)?;

    let data = data
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| StoreError::Serialization(format!("document {}: {}", id, e)))?;

    Ok(Document {
        id: DocumentId::new(id),
        tenant_id,
        data,
        migrated: MigrationMarker::from_flag(migrated),
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn count_unmigrated(&self, collection: &str, tenant_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM documents
            WHERE collection = ? AND tenant_id = ? AND migrated IS NULL
            "#,
        )
        .bind(collection)
        .bind(tenant_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(query_error)?;

        let total: i64 = row.try_get("total").map_err(query_error)?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn find_unmigrated(
        &self,
        collection: &str,
        filter: &ScanFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let after = filter.after.as_ref().map(DocumentId::as_str);
        let limit = i64::try_from(filter.limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, data, migrated
            FROM documents
            WHERE collection = ? AND tenant_id = ? AND migrated IS NULL
              AND (? IS NULL OR id > ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(collection)
        .bind(&filter.tenant_id)
        .bind(after)
        .bind(after)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn bulk_update(
        &self,
        collection: &str,
        operations: &[UpdateOperation],
    ) -> Result<BulkWriteAck, StoreError> {
        let attempted = operations.len();
        let fail = |e: &dyn std::fmt::Display| StoreError::bulk_write(attempted, e.to_string());

        let mut tx = self.pool.begin().await.map_err(|e| fail(&e))?;
        let mut ack = BulkWriteAck::default();

        for op in operations {
            let row = sqlx::query("SELECT data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(op.id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| fail(&e))?;
            let Some(row) = row else {
                continue;
            };
            ack.matched += 1;

            let data: Option<String> = row.try_get("data").map_err(|e| fail(&e))?;
            let data = match (data, op.changed()) {
                (Some(text), true) => {
                    let mut payload: serde_json::Value =
                        serde_json::from_str(&text).map_err(|e| fail(&e))?;
                    let missing = op
                        .set_fields
                        .iter()
                        .find(|(field, value)| !apply_field_update(&mut payload, field, value));
                    if let Some((field, _)) = missing {
                        warn!("Rejected update for document {}: field {} not found", op.id, field);
                        ack.rejected.push(op.id.clone());
                        continue;
                    }
                    Some(serde_json::to_string(&payload).map_err(|e| fail(&e))?)
                }
                (None, true) => {
                    warn!("Rejected update for document {}: no payload stored", op.id);
                    ack.rejected.push(op.id.clone());
                    continue;
                }
                (data, false) => data,
            };

            let result = sqlx::query(
                "UPDATE documents SET data = ?, migrated = ? WHERE collection = ? AND id = ?",
            )
            .bind(data)
            .bind(op.marker.as_flag())
            .bind(collection)
            .bind(op.id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| fail(&e))?;
            if result.rows_affected() > 0 {
                ack.modified += 1;
            }
        }

        tx.commit().await.map_err(|e| fail(&e))?;
        Ok(ack)
    }
}
