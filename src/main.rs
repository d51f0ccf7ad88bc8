#![allow(missing_docs)]

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

use cdn_url_migrator::application::{MigrationDriver, log_summary, write_csv};
use cdn_url_migrator::domain::UrlRewriter;
use cdn_url_migrator::infrastructure::{
    AppConfig, DatabaseConnection, SqliteDocumentStore, init_logging_with_config,
    log_system_info,
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            // Logging may not be up yet
            eprintln!("cdn-url-migrator: {:#}", e);
            error!("Migration failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<u8> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging_with_config(&config.logging).context("Failed to initialize logging")?;
    log_system_info(&config.summary());

    let db = DatabaseConnection::new(&config.store.connection_string).await?;
    db.migrate().await.context("Failed to prepare document store")?;
    let store = Arc::new(SqliteDocumentStore::new(db.pool().clone()));

    let rewriter = UrlRewriter::new(config.rewrite.clone())?;
    let driver = MigrationDriver::new(store, rewriter, config.migration.settings())?;

    let report = driver.run().await;

    log_summary(&report);
    write_csv(&report, &config.migration.export_path)?;

    Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}
