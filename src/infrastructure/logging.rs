//! Logging system configuration and initialization
//!
//! - Console and/or file output
//! - Structured JSON file logs (optional)
//! - Existing log file rotated by timestamp on startup
//! - Old log files pruned beyond `max_files`

#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local, Utc};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Timestamp formatter, UTC or local time
#[derive(Debug, Clone, Copy)]
struct LogTimer {
    utc: bool,
}

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        if self.utc {
            write!(w, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
        } else {
            write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %z"))
        }
    }
}

/// Rotate the existing log file by renaming it with its timestamp
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<Option<String>> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(None);
    }

    let metadata = std::fs::metadata(&log_file_path)
        .map_err(|e| anyhow!("Failed to get log file metadata: {}", e))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let datetime: DateTime<Utc> = file_time.into();

    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{}.{}.log", file_stem, datetime.format("%Y%m%dT%H%M%S"));
    let timestamped_path = log_dir.join(&timestamped_name);

    std::fs::rename(&log_file_path, &timestamped_path).map_err(|e| {
        anyhow!(
            "Failed to rotate log file {} to {}: {}",
            log_file_path.display(),
            timestamped_path.display(),
            e
        )
    })?;

    Ok(Some(timestamped_name))
}

/// Build the filter: RUST_LOG wins, otherwise the configured level with
/// database noise suppressed below trace.
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;
    if !level.to_lowercase().contains("trace") {
        filter = filter
            .add_directive("sqlx::query=warn".parse()?)
            .add_directive("sqlx::sqlite=warn".parse()?)
            .add_directive(format!("cdn_url_migrator={}", level).parse()?);
    }
    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// Override the filtering with `RUST_LOG`:
/// ```bash
/// RUST_LOG="debug,sqlx::query=debug" cdn-url-migrator
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let log_dir = config.log_dir.clone();
    let timer = LogTimer {
        utc: config.use_utc,
    };

    let mut rotated = None;
    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        rotated = rotate_existing_log_file(&log_dir, &config.file_name)?;
    }

    let env_filter = build_env_filter(&config.level)?;
    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, console) => {
            let file_appender = rolling::never(&log_dir, &config.file_name);
            let (file_writer, file_guard) = non_blocking(file_appender);

            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow!("Log guard registry is poisoned"))?
                .push(file_guard);

            // Console goes first so both file branches share its subscriber type
            let console_layer = console.then(|| {
                fmt::Layer::new()
                    .with_writer(std::io::stdout)
                    .with_timer(timer)
                    .with_target(false)
            });

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(timer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);
                registry.with(console_layer).with(file_layer).try_init()?;
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(timer)
                    .with_target(false)
                    .with_ansi(false);
                registry.with(console_layer).with(file_layer).try_init()?;
            }
        }
        (false, true) => {
            let console_layer = fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(timer)
                .with_target(false);
            registry.with(console_layer).try_init()?;
        }
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log file: {:?}", log_dir.join(&config.file_name));
        if let Some(name) = rotated {
            info!("Rotated existing log file to: {}", name);
        }
        if config.auto_cleanup_logs {
            let removed = cleanup_old_logs(&log_dir, config.max_files)?;
            if removed > 0 {
                info!("Removed {} old log files (keeping {})", removed, config.max_files);
            }
        }
    }

    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info(config_summary: &str) {
    info!("=== CDN URL Migrator ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("Configuration: {}", config_summary);
    info!("========================");
}

/// Remove `.log` files beyond the newest `max_files`; returns how many were removed
fn cleanup_old_logs(log_dir: &Path, max_files: u32) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".log"));
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = max_files as usize;
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        } else {
            removed += 1;
        }
    }
    Ok(removed)
}
