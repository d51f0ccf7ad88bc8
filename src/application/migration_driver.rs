//! Batch migration driver
//!
//! Walks every (tenant, collection) pair strictly in order, scanning
//! unmigrated documents with an id cursor and writing one bulk update per
//! page. The per-document marker is the only progress record, so a killed
//! run simply resumes on the next invocation.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::document::{Document, DocumentId, ScanFilter, UpdateOperation};
use crate::domain::repositories::{DocumentStore, StoreError};
use crate::domain::services::{PathDiscovery, UrlRewriter};
use crate::domain::stats::{AbortReason, CollectionOutcome, MigrationReport, MigrationStats};

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Processing stopped due to error in tenant {tenant_id} ({collection}): {message}")]
    StoppedOnFailure {
        tenant_id: String,
        collection: String,
        message: String,
    },

    #[error("Invalid migration settings: {0}")]
    InvalidSettings(String),
}

/// Job scope and failure policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub batch_size: usize,
    pub stop_on_failure: bool,
    pub tenant_ids: Vec<String>,
    pub collections: Vec<String>,
}

impl MigrationSettings {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.batch_size == 0 {
            return Err(MigrationError::InvalidSettings(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.tenant_ids.is_empty() {
            return Err(MigrationError::InvalidSettings(
                "no tenant ids configured".to_string(),
            ));
        }
        if self.collections.is_empty() {
            return Err(MigrationError::InvalidSettings(
                "no collections configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Update operations for one page plus what they will change
#[derive(Debug, Default)]
pub struct PagePlan {
    pub operations: Vec<UpdateOperation>,
    pub rewritten_documents: u64,
    pub rewritten_urls: u64,
    /// Documents whose legacy URLs could not all be located; they get no
    /// operation and stay unmarked
    pub skipped: Vec<DocumentId>,
}

impl PagePlan {
    /// Rewrite counters for the operations the store did not reject
    fn applied_rewrites(&self, rejected: &[DocumentId]) -> (u64, u64) {
        self.operations
            .iter()
            .filter(|op| op.changed() && !rejected.contains(&op.id))
            .fold((0, 0), |(documents, urls), op| {
                (documents + 1, urls + op.set_fields.len() as u64)
            })
    }
}

pub struct MigrationDriver {
    store: Arc<dyn DocumentStore>,
    rewriter: UrlRewriter,
    discovery: PathDiscovery,
    settings: MigrationSettings,
}

impl MigrationDriver {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        rewriter: UrlRewriter,
        settings: MigrationSettings,
    ) -> Result<Self, MigrationError> {
        settings.validate()?;
        let discovery = PathDiscovery::new(
            rewriter.config().legacy_host_marker.clone(),
            rewriter.config().max_discovery_depth,
        );
        Ok(Self {
            store,
            rewriter,
            discovery,
            settings,
        })
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Run the whole job once. Safe to call again: already-marked documents
    /// are never fetched twice.
    pub async fn run(&self) -> MigrationReport {
        let mut report = MigrationReport::default();

        'tenants: for tenant_id in &self.settings.tenant_ids {
            info!("Processing tenant: {}", tenant_id);

            for collection in &self.settings.collections {
                let mut stats = MigrationStats::default();
                match self.migrate_collection(tenant_id, collection, &mut stats).await {
                    Ok(()) => {
                        info!(
                            "Completed {} / {}: processed={} success={} failed={}",
                            tenant_id,
                            collection,
                            stats.total_processed,
                            stats.success_count,
                            stats.failed_count
                        );
                        report
                            .outcomes
                            .push(CollectionOutcome::completed(tenant_id, collection, stats));
                    }
                    Err(e) => {
                        let message = e.to_string();
                        error!("Failed {} / {}: {}", tenant_id, collection, message);
                        report.outcomes.push(CollectionOutcome::failed(
                            tenant_id,
                            collection,
                            stats,
                            message.clone(),
                        ));
                        if self.settings.stop_on_failure {
                            report.aborted = Some(AbortReason {
                                tenant_id: tenant_id.clone(),
                                collection: collection.clone(),
                                error: message,
                            });
                            break 'tenants;
                        }
                    }
                }
            }
        }

        report
    }

    /// Scan one pair until an empty page. Counters accumulate into `stats`
    /// even when an error is returned.
    pub async fn migrate_collection(
        &self,
        tenant_id: &str,
        collection: &str,
        stats: &mut MigrationStats,
    ) -> Result<(), MigrationError> {
        let total_eligible = self.store.count_unmigrated(collection, tenant_id).await?;
        info!(
            "Tenant {} collection {}: {} documents to check",
            tenant_id, collection, total_eligible
        );

        let mut last_seen: Option<DocumentId> = None;
        loop {
            let filter = ScanFilter {
                tenant_id: tenant_id.to_string(),
                after: last_seen.clone(),
                limit: self.settings.batch_size,
            };
            let page = self.store.find_unmigrated(collection, &filter).await?;
            let Some(last) = page.last() else {
                break;
            };
            let next_cursor = last.id.clone();

            let plan = self.plan_page(&page);
            let attempted = plan.operations.len() as u64;
            stats.total_processed += page.len() as u64;
            stats.failed_count += plan.skipped.len() as u64;

            if !plan.operations.is_empty() {
                match self.store.bulk_update(collection, &plan.operations).await {
                    Ok(ack) => {
                        debug!(
                            "Bulk write acknowledged: matched={} modified={} rejected={}",
                            ack.matched,
                            ack.modified,
                            ack.rejected.len()
                        );
                        let rejected = ack.rejected.len() as u64;
                        if rejected > 0 {
                            warn!(
                                "Tenant {} - {} documents rejected by the store and left unmarked",
                                tenant_id, rejected
                            );
                        }
                        let (documents, urls) = plan.applied_rewrites(&ack.rejected);
                        stats.success_count += attempted.saturating_sub(rejected);
                        stats.failed_count += rejected;
                        stats.rewritten_documents += documents;
                        stats.rewritten_urls += urls;
                    }
                    Err(e) => {
                        stats.failed_count += attempted;
                        if self.settings.stop_on_failure {
                            return Err(MigrationError::StoppedOnFailure {
                                tenant_id: tenant_id.to_string(),
                                collection: collection.to_string(),
                                message: e.to_string(),
                            });
                        }
                        warn!(
                            "Tenant {} - Bulk write error, {} documents left unmarked: {}",
                            tenant_id, attempted, e
                        );
                    }
                }
            }

            info!(
                "Tenant {} collection {}: page of {} up to id {} ({})",
                tenant_id,
                collection,
                page.len(),
                next_cursor,
                progress_percentage(stats.total_processed, total_eligible)
            );
            last_seen = Some(next_cursor);
        }

        Ok(())
    }

    /// One update operation per document: changed fields plus the marker stamp.
    /// Documents with legacy URLs that cannot all be located or written back
    /// are listed in [`PagePlan::skipped`] instead.
    pub fn plan_page(&self, documents: &[Document]) -> PagePlan {
        let mut plan = PagePlan::default();
        for document in documents {
            let mut op = UpdateOperation::new(document.id.clone());
            if let Some(payload) = document.populated_payload() {
                let found = self.discovery.discover(payload, "");
                if !found.is_complete() {
                    warn!(
                        "Document {} left unmarked: {} containers past depth bound, {} unaddressable legacy URLs",
                        document.id, found.truncated, found.unaddressable
                    );
                    plan.skipped.push(document.id.clone());
                    continue;
                }
                for result in self.rewriter.rewrite_all(&found.urls) {
                    op.set_payload_field(&result.path, result.new_url);
                }
            }
            if op.changed() {
                plan.rewritten_documents += 1;
                plan.rewritten_urls += op.set_fields.len() as u64;
            }
            plan.operations.push(op);
        }
        plan
    }
}

/// `processed / total` as a percentage string, `n/a` when there is nothing to count
pub fn progress_percentage(processed: u64, total: u64) -> String {
    if total == 0 {
        return "n/a".to_string();
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = (processed as f64 / total as f64 * 100.0).min(100.0);
    format!("{:.2}%", pct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::MigrationMarker;
    use crate::domain::rewrite_rules::RewriteConfig;
    use crate::infrastructure::memory_document_store::InMemoryDocumentStore;
    use serde_json::json;

    fn settings(stop_on_failure: bool) -> MigrationSettings {
        MigrationSettings {
            batch_size: 2,
            stop_on_failure,
            tenant_ids: vec!["t1".into()],
            collections: vec!["pages".into()],
        }
    }

    fn driver(store: Arc<InMemoryDocumentStore>, stop_on_failure: bool) -> MigrationDriver {
        let rewriter = UrlRewriter::new(RewriteConfig::default()).unwrap();
        MigrationDriver::new(store, rewriter, settings(stop_on_failure)).unwrap()
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut s = settings(false);
        s.batch_size = 0;
        assert!(matches!(
            s.validate(),
            Err(MigrationError::InvalidSettings(_))
        ));
    }

    #[test]
    fn progress_is_guarded_for_zero() {
        assert_eq!(progress_percentage(5, 0), "n/a");
        assert_eq!(progress_percentage(1, 4), "25.00%");
        assert_eq!(progress_percentage(9, 4), "100.00%");
    }

    #[test]
    fn plans_one_operation_per_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let driver = driver(store, false);
        let mut empty = Document::new("c", "t1", json!(null));
        empty.data = None;
        let plan = driver.plan_page(&[
            Document::new(
                "a",
                "t1",
                json!({"img": "https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/a.png"}),
            ),
            Document::new("b", "t1", json!({"text": "nothing here"})),
            empty,
        ]);
        assert_eq!(plan.operations.len(), 3);
        assert_eq!(plan.rewritten_documents, 1);
        assert_eq!(plan.operations[0].marker, MigrationMarker::Rewritten);
        assert_eq!(
            plan.operations[0].set_fields["data.img"],
            "https://bfplugins.imgix.net/a.png"
        );
        assert_eq!(plan.operations[1].marker, MigrationMarker::Unchanged);
        assert_eq!(plan.operations[2].marker, MigrationMarker::Unchanged);
    }

    #[test]
    fn skips_documents_that_cannot_be_fully_rewritten() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let driver = driver(store, false);
        let legacy = "https://alnnibitpo.cloudimg.io/v7/https://pluginserver.buildfire.com/a.png";
        let plan = driver.plan_page(&[
            Document::new("dotted", "t1", json!({"img.src": legacy, "ok": legacy})),
            Document::new("plain", "t1", json!({"ok": legacy})),
        ]);
        assert_eq!(plan.skipped, vec![DocumentId::new("dotted")]);
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.operations[0].id, DocumentId::new("plain"));
        assert_eq!(plan.rewritten_urls, 1);
    }

    #[test]
    fn applied_rewrites_exclude_rejected_operations() {
        let mut first = UpdateOperation::new(DocumentId::new("a"));
        first.set_payload_field("x", "1".into());
        first.set_payload_field("y", "2".into());
        let mut second = UpdateOperation::new(DocumentId::new("b"));
        second.set_payload_field("x", "1".into());
        let plan = PagePlan {
            operations: vec![first, second, UpdateOperation::new(DocumentId::new("c"))],
            ..PagePlan::default()
        };
        assert_eq!(plan.applied_rewrites(&[]), (2, 3));
        assert_eq!(plan.applied_rewrites(&[DocumentId::new("a")]), (1, 1));
    }

    #[tokio::test]
    async fn count_failure_fails_pair_without_abort_under_continue() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.fail_next_scans(1);
        let report = driver(store, false).run().await;
        assert!(!report.is_aborted());
        assert_eq!(report.failed_pairs(), 1);
    }
}
