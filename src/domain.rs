//! Domain module - documents, rewrite rules and the pure services over them
//!
//! - `document`: tenant documents, markers, update operations
//! - `repositories`: the document store seam
//! - `rewrite_rules`: legacy CDN tables as explicit configuration
//! - `services`: path discovery and the URL rewrite engine
//! - `stats`: per-pair counters and run reports

pub mod document;
pub mod repositories;
pub mod rewrite_rules;
pub mod services;
pub mod stats;

pub use document::{
    DiscoveredUrl, Document, DocumentId, MigrationMarker, RewriteResult, ScanFilter,
    UpdateOperation,
};
pub use repositories::{BulkWriteAck, DocumentStore, StoreError};
pub use rewrite_rules::{DomainRule, RewriteConfig};
pub use services::{Classified, Discovery, PathDiscovery, RewriteError, Shape, UrlRewriter};
pub use stats::{
    AbortReason, CollectionOutcome, CollectionStatus, MigrationReport, MigrationStats,
};
