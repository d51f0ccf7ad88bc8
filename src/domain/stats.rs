//! Migration statistics and outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per (tenant, collection) counters.
///
/// `failed_count` is advisory: a crash between a failed bulk write and the
/// retry can count the same document twice. The migration marker is the
/// only authoritative progress record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    /// Documents fetched and processed in any page
    pub total_processed: u64,
    /// Documents whose update (marker and changed fields) was acknowledged
    pub success_count: u64,
    /// Documents whose update was attempted in a failed bulk write
    pub failed_count: u64,
    /// Documents that had at least one URL rewritten
    pub rewritten_documents: u64,
    /// Individual URL fields rewritten
    pub rewritten_urls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Completed,
    Failed,
}

impl CollectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record of one (tenant, collection) scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub tenant_id: String,
    pub collection: String,
    pub status: CollectionStatus,
    pub stats: MigrationStats,
    pub error: Option<String>,
}

impl CollectionOutcome {
    pub fn completed(tenant_id: &str, collection: &str, stats: MigrationStats) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            collection: collection.to_string(),
            status: CollectionStatus::Completed,
            stats,
            error: None,
        }
    }

    pub fn failed(
        tenant_id: &str,
        collection: &str,
        stats: MigrationStats,
        error: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            collection: collection.to_string(),
            status: CollectionStatus::Failed,
            stats,
            error: Some(error.into()),
        }
    }
}

/// Why a job stopped before visiting every pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub tenant_id: String,
    pub collection: String,
    pub error: String,
}

/// Everything a migration run produced, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub outcomes: Vec<CollectionOutcome>,
    pub aborted: Option<AbortReason>,
}

impl MigrationReport {
    pub fn outcome(&self, tenant_id: &str, collection: &str) -> Option<&CollectionOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.collection == collection)
    }

    pub const fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn failed_pairs(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == CollectionStatus::Failed)
            .count()
    }

    /// Sum of all per-pair counters
    pub fn totals(&self) -> MigrationStats {
        self.outcomes
            .iter()
            .fold(MigrationStats::default(), |mut acc, o| {
                acc.total_processed += o.stats.total_processed;
                acc.success_count += o.stats.success_count;
                acc.failed_count += o.stats.failed_count;
                acc.rewritten_documents += o.stats.rewritten_documents;
                acc.rewritten_urls += o.stats.rewritten_urls;
                acc
            })
    }

    /// Process exit code for this report: non-zero only on abort
    pub const fn exit_code(&self) -> i32 {
        if self.is_aborted() { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(processed: u64, success: u64, failed: u64) -> MigrationStats {
        MigrationStats {
            total_processed: processed,
            success_count: success,
            failed_count: failed,
            ..MigrationStats::default()
        }
    }

    #[test]
    fn totals_and_lookup() {
        let report = MigrationReport {
            outcomes: vec![
                CollectionOutcome::completed("t1", "pages", stats(3, 3, 0)),
                CollectionOutcome::failed("t2", "pages", stats(2, 0, 2), "boom"),
            ],
            aborted: None,
        };
        assert_eq!(report.totals(), stats(5, 3, 2));
        assert_eq!(report.failed_pairs(), 1);
        assert_eq!(
            report.outcome("t2", "pages").and_then(|o| o.error.as_deref()),
            Some("boom")
        );
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn aborted_report_exits_non_zero() {
        let report = MigrationReport {
            outcomes: Vec::new(),
            aborted: Some(AbortReason {
                tenant_id: "t".into(),
                collection: "c".into(),
                error: "x".into(),
            }),
        };
        assert_eq!(report.exit_code(), 1);
    }
}
