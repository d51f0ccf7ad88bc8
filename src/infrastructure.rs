//! Infrastructure layer for configuration, logging and document storage
//!
//! This module provides the concrete `DocumentStore` adapters, the database
//! connection, layered configuration loading and logging setup.

pub mod config; // Layered configuration
pub mod database_connection;
pub mod logging; // Logging infrastructure
pub mod memory_document_store;
pub mod sqlite_document_store;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, LoggingConfig, MigrationConfig, StoreConfig};
pub use database_connection::DatabaseConnection;
pub use logging::{init_logging_with_config, log_system_info};
pub use memory_document_store::InMemoryDocumentStore;
pub use sqlite_document_store::SqliteDocumentStore;
