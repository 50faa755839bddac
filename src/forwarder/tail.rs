//! Container discovery and streaming tail.
//!
//! Kubernetes' actual pod-log layout (`/var/log/pods/<ns>_<pod>_<uid>/<container>/*.log`)
//! and the k8s API client needed to watch it are out of scope for this crate;
//! discovery here is a directory walk over a configured root, one
//! subdirectory per container.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, watch};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub name: String,
    pub log_path: PathBuf,
}

/// One subdirectory of `pod_log_root` per container; picks each container's
/// most-recently-modified `*.log` file. Skips `forwarder_name` itself so the
/// sidecar never tails its own output.
pub fn discover_containers(pod_log_root: &Path, forwarder_name: &str) -> Vec<ContainerHandle> {
    let mut handles = Vec::new();
    let entries = match std::fs::read_dir(pod_log_root) {
        Ok(e) => e,
        Err(_) => return handles,
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let name = match dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if name == forwarder_name {
            continue;
        }

        let latest = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
            .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));

        if let Some(latest) = latest {
            handles.push(ContainerHandle {
                name,
                log_path: latest.path().to_path_buf(),
            });
        }
    }

    handles.sort_by(|a, b| a.name.cmp(&b.name));
    handles
}

/// Parse `"<RFC3339Nano> <remainder>"`. Falls back to `now()` when the
/// prefix doesn't parse, so malformed lines are still forwarded.
pub fn parse_line(line: &str) -> (DateTime<Utc>, String) {
    if let Some((ts_str, rest)) = line.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(ts_str) {
            return (ts.with_timezone(&Utc), rest.to_string());
        }
    }
    (Utc::now(), line.to_string())
}

/// Stream `handle`'s log file from the start, forwarding `(container, ts,
/// msg)` on `tx`. Polls for growth (no inotify dependency on the tail path
/// itself — discovery already pays that cost once at startup) and exits
/// cleanly when `shutdown` fires.
pub async fn tail_container(
    handle: ContainerHandle,
    tx: mpsc::Sender<(String, DateTime<Utc>, String)>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let file = tokio::fs::File::open(&handle.log_path)
        .await
        .with_context(|| format!("opening {}", handle.log_path.display()))?;
    let mut reader = BufReader::new(file);

    loop {
        let mut line = String::new();
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            n = reader.read_line(&mut line) => {
                let n = n.with_context(|| format!("reading {}", handle.log_path.display()))?;
                if n == 0 {
                    // Caught up; wait for more bytes to land.
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                    // Re-seek to current position (a no-op unless the file
                    // grew) so the next read_line sees fresh bytes.
                    let pos = reader.stream_position().await.unwrap_or(0);
                    reader.seek(std::io::SeekFrom::Start(pos)).await.ok();
                    continue;
                }
                let trimmed = line.trim_end_matches('\n');
                if trimmed.is_empty() {
                    continue;
                }
                let (ts, msg) = parse_line(trimmed);
                if tx.send((handle.name.clone(), ts, msg)).await.is_err() {
                    return Ok(()); // batcher gone, shut down quietly
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discover_skips_forwarder_container_and_picks_log_files() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("api")).unwrap();
        fs::write(root.path().join("api").join("0.log"), b"hello\n").unwrap();
        fs::create_dir_all(root.path().join("logtap-forwarder")).unwrap();
        fs::write(root.path().join("logtap-forwarder").join("0.log"), b"x\n").unwrap();

        let handles = discover_containers(root.path(), "logtap-forwarder");
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].name, "api");
    }

    #[test]
    fn parse_line_falls_back_to_now_on_bad_prefix() {
        let (_, msg) = parse_line("not a timestamp rest of line");
        assert_eq!(msg, "not a timestamp rest of line");
    }

    #[test]
    fn parse_line_splits_rfc3339nano_prefix() {
        let (ts, msg) = parse_line("2024-01-01T00:00:00.123456789Z connection refused");
        assert_eq!(msg, "connection refused");
        assert_eq!(ts.timestamp(), 1704067200);
    }
}
