//! CDN URL Migrator - resumable migration of legacy CDN image URLs
//!
//! Scans tenant document collections, finds URLs on the deprecated image
//! transform service anywhere in each payload, rewrites them to the new CDN
//! and stamps every document with a migration marker.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

// Re-export the main entry points
pub use application::{MigrationDriver, MigrationError, MigrationSettings};
pub use domain::{DocumentStore, MigrationReport, RewriteConfig, UrlRewriter};
pub use infrastructure::AppConfig;
