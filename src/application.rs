//! Application layer module
//!
//! Orchestrates the domain services against an injected document store and
//! turns the run into a report.

pub mod migration_driver;
pub mod reporter;

pub use migration_driver::{MigrationDriver, MigrationError, MigrationSettings, PagePlan};
pub use reporter::{log_summary, render_csv, write_csv};
