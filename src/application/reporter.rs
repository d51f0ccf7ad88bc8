//! Migration summary and CSV export

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

use crate::domain::stats::{CollectionOutcome, MigrationReport};

pub const CSV_HEADER: &str =
    "TenantId,Collection,Status,TotalProcessed,SuccessfulUpdates,FailedUpdates,Error";

/// Emit the human-readable summary, one block per pair
pub fn log_summary(report: &MigrationReport) {
    info!("===== Migration Summary =====");
    for outcome in &report.outcomes {
        info!("Tenant: {}", outcome.tenant_id);
        info!("  Collection: {}", outcome.collection);
        info!("  Status: {}", outcome.status);
        info!("  Total Processed: {}", outcome.stats.total_processed);
        info!("  Successful Updates: {}", outcome.stats.success_count);
        info!("  Failed Updates: {}", outcome.stats.failed_count);
        info!(
            "  Rewritten: {} documents, {} URLs",
            outcome.stats.rewritten_documents, outcome.stats.rewritten_urls
        );
        if let Some(error) = &outcome.error {
            info!("  Error: {}", error);
        }
    }

    let totals = report.totals();
    info!(
        "Totals: pairs={} failed_pairs={} processed={} success={} failed={}",
        report.outcomes.len(),
        report.failed_pairs(),
        totals.total_processed,
        totals.success_count,
        totals.failed_count
    );
    if let Some(abort) = &report.aborted {
        warn!(
            "Run aborted at tenant {} ({}): {}",
            abort.tenant_id, abort.collection, abort.error
        );
    }
    info!("=============================");
}

/// Render the report as CSV text, header first, one row per pair
pub fn render_csv(report: &MigrationReport) -> String {
    let mut csv = String::with_capacity(64 * (report.outcomes.len() + 1));
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for outcome in &report.outcomes {
        csv.push_str(&csv_row(outcome));
        csv.push('\n');
    }
    csv
}

fn csv_row(outcome: &CollectionOutcome) -> String {
    let mut row = String::new();
    let _ = write!(
        row,
        "{},{},{},{},{},{},",
        quote_if_needed(&outcome.tenant_id),
        quote_if_needed(&outcome.collection),
        outcome.status,
        outcome.stats.total_processed,
        outcome.stats.success_count,
        outcome.stats.failed_count
    );
    if let Some(error) = &outcome.error {
        row.push_str(&quote(error));
    }
    row
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Write the CSV artifact, creating parent directories
pub fn write_csv(report: &MigrationReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, render_csv(report))
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("CSV report exported to {}", path.display());
    Ok(())
}
