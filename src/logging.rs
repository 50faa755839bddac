//! Tracing initialization.
//!
//! One-shot CLI commands log to stderr. The long-running daemons (`serve`,
//! `forward`) use a rolling-daily file appender so a pod restart doesn't
//! truncate history mid-incident.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;

/// Guard must be held for the lifetime of the process once a file appender
/// is installed — dropping it flushes and stops the background writer.
pub fn init(daemon: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    if daemon {
        if let Some(dir) = log_dir {
            std::fs::create_dir_all(dir)?;
            prune_old_logs(dir, 7);

            let file_appender = tracing_appender::rolling::daily(dir, "logtap.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive("logtap=info".parse()?),
                )
                .init();

            return Ok(Some(guard));
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("logtap=info".parse()?),
        )
        .init();

    Ok(None)
}

fn prune_old_logs(log_dir: &Path, keep_days: u64) {
    let cutoff = std::time::SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(keep_days * 86400))
        .unwrap_or(std::time::UNIX_EPOCH);

    if let Ok(entries) = std::fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_own_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("logtap.log"))
                .unwrap_or(false);
            if !is_own_log {
                continue;
            }
            if let Ok(meta) = std::fs::metadata(&path) {
                if let Ok(modified) = meta.modified() {
                    if modified < cutoff {
                        let _ = std::fs::remove_file(&path);
                    }
                }
            }
        }
    }
}
