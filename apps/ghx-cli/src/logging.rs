//! Logging initialization and log file management.
//!
//! Tracing always goes to stderr. Commands that talk to the remote service
//! or change a session also write JSON lines to
//! `<state_dir>/logs/<command>/<timestamp>.log`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maximum age of log files before cleanup, in days.
const LOG_RETENTION_DAYS: u64 = 3;

/// Initialize the tracing subscriber with stderr output.
///
/// When `command` is `Some`, a JSON file layer is added as well. The
/// returned [`WorkerGuard`] must be held until exit so buffered lines are
/// flushed.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created.
pub fn init_tracing(state_dir: &Path, command: Option<&str>) -> Result<Option<WorkerGuard>> {
    if let Some((subscriber, guard)) = build_tracing(state_dir, command)? {
        subscriber.init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::from_default_env())
            .init();
        Ok(None)
    }
}

fn build_tracing(
    state_dir: &Path,
    command: Option<&str>,
) -> Result<Option<(impl tracing::Subscriber + Send + Sync, WorkerGuard)>> {
    let Some(command) = command else {
        return Ok(None);
    };

    let (non_blocking, guard) = open_log_writer(state_dir, command)?;

    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::from_default_env()),
        );

    Ok(Some((subscriber, guard)))
}

fn open_log_writer(
    state_dir: &Path,
    command: &str,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let log_path = build_log_path(state_dir, command, Utc::now());
    let log_dir = log_path.parent().context(format!(
        "failed to resolve parent directory for log path: {}",
        log_path.display(),
    ))?;

    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("failed to create log file: {}", log_path.display()))?;

    Ok(tracing_appender::non_blocking(log_file))
}

/// Remove `.log` files older than three days from `<state_dir>/logs/`,
/// then any directories left empty.
///
/// Best-effort: runs before tracing is up, so problems are reported with
/// `eprintln!` and never fail the command.
pub fn cleanup_old_logs(state_dir: &Path) {
    let logs_dir = state_dir.join("logs");
    if !logs_dir.is_dir() {
        return;
    }

    let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);

    remove_old_log_files(&logs_dir, cutoff);
    remove_empty_dirs(&logs_dir);
}

/// `<state_dir>/logs/<command>/<YYYYMMDD_HHMMSS>.log`
fn build_log_path(state_dir: &Path, command: &str, now: DateTime<Utc>) -> PathBuf {
    state_dir
        .join("logs")
        .join(command)
        .join(format!("{}.log", now.format("%Y%m%d_%H%M%S")))
}

fn remove_old_log_files(dir: &Path, cutoff: SystemTime) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!(
                "warning: failed to read log directory {}: {e}",
                dir.display()
            );
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            remove_old_log_files(&path, cutoff);
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                eprintln!(
                    "warning: failed to read metadata for {}: {e}",
                    path.display()
                );
                continue;
            }
        };

        if modified < cutoff
            && let Err(e) = fs::remove_file(&path)
        {
            eprintln!(
                "warning: failed to remove old log file {}: {e}",
                path.display(),
            );
        }
    }
}

/// Remove empty subdirectories under `dir`, keeping `dir` itself.
fn remove_empty_dirs(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            remove_empty_dirs(&path);
            // Fails while the directory still has files.
            let _ = fs::remove_dir(&path);
        }
    }
}
