//! Configuration infrastructure
//!
//! Layered configuration for the migration job. Later layers win:
//! 1. compiled defaults
//! 2. optional config file (`config/migration.*` or `$CDN_MIGRATE_CONFIG`)
//! 3. prefixed environment (`CDN_MIGRATE__MIGRATION__BATCH_SIZE`, ...)
//! 4. the job's historical flat variables (`BATCH_SIZE`, `TENANT_IDS`, ...)

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::application::MigrationSettings;
use crate::domain::RewriteConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CDN_MIGRATE_CONFIG";
/// Prefix for structured environment overrides
pub const ENV_PREFIX: &str = "CDN_MIGRATE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to read .env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Invalid configuration: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub migration: MigrationConfig,
    pub store: StoreConfig,
    pub rewrite: RewriteConfig,
    pub logging: LoggingConfig,
}

/// Job scope and batching policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Documents fetched and written per page
    pub batch_size: usize,

    /// Abort the whole job on the first bulk-write or store failure
    pub stop_on_failure: bool,

    /// Tenants processed strictly in this order
    pub tenant_ids: Vec<String>,

    /// Collections processed per tenant in this order
    pub collections: Vec<String>,

    /// Where the CSV report is written
    pub export_path: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            stop_on_failure: false,
            tenant_ids: Vec::new(),
            collections: Vec::new(),
            export_path: PathBuf::from(defaults::EXPORT_PATH),
        }
    }
}

impl MigrationConfig {
    pub fn settings(&self) -> MigrationSettings {
        MigrationSettings {
            batch_size: self.batch_size,
            stop_on_failure: self.stop_on_failure,
            tenant_ids: self.tenant_ids.clone(),
            collections: self.collections.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection URL, e.g. `sqlite://data/documents.db`
    pub connection_string: String,

    /// Logical database name, reported in the startup banner
    pub database_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: defaults::CONNECTION_STRING.to_string(),
            database_name: defaults::DATABASE_NAME.to_string(),
        }
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files
    pub log_dir: PathBuf,

    /// Active log file name
    pub file_name: String,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Timestamps in UTC instead of local time
    pub use_utc: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from(defaults::LOG_DIR),
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::MAX_LOG_FILES,
            auto_cleanup_logs: true,
            use_utc: true,
        }
    }
}

/// Flat variable names the job has always accepted, mapped to their keys
const LEGACY_ENV: &[(&str, &str)] = &[
    ("BATCH_SIZE", "migration.batch_size"),
    ("STOP_ON_FAILURE", "migration.stop_on_failure"),
    ("EXPORT_PATH", "migration.export_path"),
    ("DB_NAME", "store.database_name"),
    ("LOG_LEVEL", "logging.level"),
];

const LEGACY_LIST_ENV: &[(&str, &str)] = &[
    ("TENANT_IDS", "migration.tenant_ids"),
    ("COLLECTION_NAME", "migration.collections"),
];

const LEGACY_CONNECTION_ENV: &[&str] = &["STORE_URI", "MONGO_URI"];

impl AppConfig {
    /// Load `.env`, then build configuration from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        load_env_file()?;
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(&vars)
    }

    /// Build configuration from an explicit variable map (no `.env` handling)
    pub fn load_from(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let file_source = match vars.get(CONFIG_PATH_ENV) {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(defaults::CONFIG_FILE).required(false),
        };

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("migration.tenant_ids")
            .with_list_parse_key("migration.collections")
            .with_list_parse_key("rewrite.wrapper_prefixes")
            .with_list_parse_key("rewrite.stock_photo_hosts")
            .try_parsing(true)
            .source(Some(vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file_source)
            .add_source(environment);

        for (name, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, non_empty(vars, name))?;
        }
        for (name, key) in LEGACY_LIST_ENV {
            builder = builder.set_override_option(*key, non_empty(vars, name).map(split_list))?;
        }
        let connection = LEGACY_CONNECTION_ENV
            .iter()
            .find_map(|name| non_empty(vars, name));
        builder = builder.set_override_option("store.connection_string", connection)?;

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migration.batch_size == 0 {
            return Err(ConfigError::validation("migration.batch_size must be positive"));
        }
        if self.migration.tenant_ids.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigError::validation("at least one tenant id is required"));
        }
        if self.migration.collections.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::validation("at least one collection is required"));
        }
        if self.store.connection_string.trim().is_empty() {
            return Err(ConfigError::validation("store.connection_string must not be empty"));
        }
        url::Url::parse(&self.store.connection_string).map_err(|e| {
            ConfigError::validation(format!(
                "store.connection_string is not a valid URL: {}",
                e
            ))
        })?;
        if self.rewrite.domain_rules.iter().any(|r| r.legacy.is_empty()) {
            return Err(ConfigError::validation("domain rule keys must not be empty"));
        }
        Ok(())
    }

    /// One-line description for the startup banner
    pub fn summary(&self) -> String {
        format!(
            "tenants={} collections={:?} batch_size={} stop_on_failure={} database={} rules={}",
            self.migration.tenant_ids.len(),
            self.migration.collections,
            self.migration.batch_size,
            self.migration.stop_on_failure,
            self.store.database_name,
            self.rewrite.domain_rules.len()
        )
    }
}

/// Load `.env` from the working directory; a missing file is fine
pub fn load_env_file() -> Result<bool, ConfigError> {
    let loaded = load_env_file_from(Path::new(".env"))?;
    if loaded {
        info!("Loaded environment from .env");
    }
    Ok(loaded)
}

/// Load `.env` from an explicit path; a missing file is fine
pub fn load_env_file_from(path: &Path) -> Result<bool, ConfigError> {
    dotenvy::from_path(path)
        .map(|()| true)
        .or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            _ => Err(ConfigError::EnvFile(err)),
        })
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Compiled defaults
pub mod defaults {
    pub const BATCH_SIZE: usize = 100;
    pub const EXPORT_PATH: &str = "reports/migration_report.csv";
    pub const CONNECTION_STRING: &str = "sqlite://data/documents.db";
    pub const DATABASE_NAME: &str = "documents";
    pub const CONFIG_FILE: &str = "config/migration";
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_DIR: &str = "logs";
    pub const LOG_FILE_NAME: &str = "cdn-url-migrator.log";
    pub const MAX_LOG_FILES: u32 = 7;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_require_scope() {
        let err = AppConfig::load_from(&vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn legacy_flat_variables_apply() {
        let config = AppConfig::load_from(&vars(&[
            ("BATCH_SIZE", "25"),
            ("STOP_ON_FAILURE", "true"),
            ("TENANT_IDS", "t1, t2"),
            ("COLLECTION_NAME", "appData,pages"),
            ("MONGO_URI", "sqlite::memory:"),
            ("DB_NAME", "prod"),
        ]))
        .unwrap();

        assert_eq!(config.migration.batch_size, 25);
        assert!(config.migration.stop_on_failure);
        assert_eq!(config.migration.tenant_ids, vec!["t1", "t2"]);
        assert_eq!(config.migration.collections, vec!["appData", "pages"]);
        assert_eq!(config.store.connection_string, "sqlite::memory:");
        assert_eq!(config.store.database_name, "prod");
        assert_eq!(config.rewrite, RewriteConfig::default());
    }

    #[test]
    fn prefixed_environment_overrides_nested_keys() {
        let config = AppConfig::load_from(&vars(&[
            ("CDN_MIGRATE__MIGRATION__BATCH_SIZE", "7"),
            ("CDN_MIGRATE__MIGRATION__TENANT_IDS", "a,b,c"),
            ("CDN_MIGRATE__MIGRATION__COLLECTIONS", "appData"),
            ("CDN_MIGRATE__LOGGING__LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.migration.batch_size, 7);
        assert_eq!(config.migration.tenant_ids, vec!["a", "b", "c"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn flat_variables_win_over_prefixed() {
        let config = AppConfig::load_from(&vars(&[
            ("CDN_MIGRATE__MIGRATION__BATCH_SIZE", "7"),
            ("BATCH_SIZE", "9"),
            ("TENANT_IDS", "a"),
            ("COLLECTION_NAME", "appData"),
        ]))
        .unwrap();
        assert_eq!(config.migration.batch_size, 9);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = AppConfig::load_from(&vars(&[
            ("BATCH_SIZE", "0"),
            ("TENANT_IDS", "a"),
            ("COLLECTION_NAME", "appData"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn reads_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[migration]
batch_size = 50
tenant_ids = ["tenant-a"]
collections = ["appData"]

[[rewrite.domain_rules]]
legacy = "bucket.example.com"
target = "bucket.imgix.net"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(&vars(&[(
            CONFIG_PATH_ENV,
            path.to_str().unwrap(),
        )]))
        .unwrap();

        assert_eq!(config.migration.batch_size, 50);
        assert_eq!(config.rewrite.domain_rules.len(), 1);
        assert_eq!(config.rewrite.domain_rules[0].target, "bucket.imgix.net");
        assert_eq!(config.rewrite.legacy_host_marker, "cloudimg.io");
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file_from(&dir.path().join(".env")).unwrap());
    }

    #[test]
    fn env_file_values_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "CDN_MIGRATE_ENV_FILE_MARKER=loaded\n").unwrap();

        assert!(load_env_file_from(&path).unwrap());
        assert_eq!(
            std::env::var("CDN_MIGRATE_ENV_FILE_MARKER").as_deref(),
            Ok("loaded")
        );
    }
}
