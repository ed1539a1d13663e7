//! Logging setup and log file housekeeping.
//!
//! Structured logging goes to the console and to daily-rolling files under
//! the terminal's data directory. The host initialises this once at startup
//! and holds the returned guard for the lifetime of the process — dropping
//! it flushes the file writer.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log file prefix: `stocktake.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "stocktake";

/// Keep at most this many daily log files.
const MAX_LOG_FILES: usize = 14;

/// Initialize structured logging (console + rolling file).
///
/// The filter honours `RUST_LOG`, defaulting to `info` with debug for this
/// crate. Fails if a global subscriber is already installed.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,the_small_stocktake=debug"));

    // Prune old log files before setting up the appender
    prune_old_logs(log_dir);
    fs::create_dir_all(log_dir).map_err(|e| format!("create log dir: {e}"))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("logging already initialised: {e}"))?;

    Ok(guard)
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with(LOG_FILE_PREFIX) {
                        let modified = entry
                            .metadata()
                            .ok()
                            .and_then(|m| m.modified().ok())
                            .unwrap_or(std::time::UNIX_EPOCH);
                        log_files.push((path, modified));
                    }
                }
            }
        }
    }

    // Sort newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    // Remove files beyond the limit
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "stocktake-test-{tag}-{}",
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    fn prune_keeps_only_the_newest_files() {
        let dir = scratch_dir("prune");

        for i in 0..(MAX_LOG_FILES + 3) {
            let path = dir.join(format!("{LOG_FILE_PREFIX}.2026-07-{:02}", i + 1));
            fs::write(&path, b"log").unwrap();
        }
        // An unrelated file must survive pruning.
        fs::write(dir.join("notes.txt"), b"keep me").unwrap();

        prune_old_logs(&dir);

        let remaining = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with(LOG_FILE_PREFIX)
            })
            .count();
        assert_eq!(remaining, MAX_LOG_FILES);
        assert!(dir.join("notes.txt").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_ignores_missing_directory() {
        prune_old_logs(Path::new("/nonexistent/stocktake-logs"));
    }
}
