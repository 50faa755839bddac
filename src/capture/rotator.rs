//! Rotator + disk-cap enforcer. Runs inline in the writer's own thread so
//! there is never a separate lock on index state (design note in §9).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::capture::index;
use crate::capture::writer::Accumulator;
use crate::metrics::Registry;

/// zstd compression level. Kept low (not the library default of 3 changed)
/// so streaming memory for the encoder window stays comfortably under 8 MiB.
const ZSTD_LEVEL: i32 = 3;

/// Steps 1–4 of the rotation procedure: the active file has already been
/// flushed + fsync'd by `Writer::close_for_rotation`. This compresses it,
/// swaps the plain file for the `.zst` file, and appends the index entry.
pub fn rotate(
    dir: &Path,
    active_path: &Path,
    acc: Accumulator,
    metrics: &Registry,
) -> Result<()> {
    let file_name = active_path
        .file_name()
        .context("active path has no file name")?
        .to_string_lossy()
        .to_string();

    let zst_path = active_path.with_extension("jsonl.zst");
    compress_streaming(active_path, &zst_path)
        .with_context(|| format!("compressing {}", active_path.display()))?;

    let zst_len = std::fs::metadata(&zst_path)
        .with_context(|| format!("stat {}", zst_path.display()))?
        .len();
    if zst_len == 0 {
        bail!("compressed file {} is empty, refusing to drop plain file", zst_path.display());
    }

    std::fs::remove_file(active_path)
        .with_context(|| format!("removing plain file {}", active_path.display()))?;

    let zst_name = format!("{file_name}.zst");
    let entry = acc.into_index_entry(zst_name);
    index::append(dir, &entry).context("appending index entry")?;

    metrics.inc_rotation();
    Ok(())
}

fn compress_streaming(src: &Path, dst: &Path) -> Result<()> {
    let input = File::open(src)?;
    let mut reader = BufReader::with_capacity(64 * 1024, input);
    let output = File::create(dst)?;
    let mut encoder = zstd::Encoder::new(output, ZSTD_LEVEL)?;
    std::io::copy(&mut reader, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;
    Ok(())
}

/// While total on-disk bytes (indexed files + the active file's current
/// size) exceed `disk_cap`, drop the oldest indexed file. Never touches the
/// active file itself.
pub fn enforce_disk_cap(
    dir: &Path,
    disk_cap: u64,
    active_file_size: u64,
    metrics: &Registry,
) -> Result<Vec<PathBuf>> {
    let mut evicted_paths = Vec::new();
    loop {
        let entries = index::read_all(dir)?;
        let indexed_bytes: u64 = entries.iter().map(|e| e.bytes).sum();
        if indexed_bytes + active_file_size <= disk_cap {
            break;
        }
        match index::evict_oldest(dir)? {
            Some(evicted) => {
                let path = dir.join(&evicted.file);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("failed to unlink evicted file {}: {}", path.display(), e);
                    }
                }
                metrics.inc_evicted();
                evicted_paths.push(path);
            }
            None => break,
        }
    }
    Ok(evicted_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogEntry;
    use chrono::Utc;

    fn write_plain_file(dir: &Path, name: &str, lines: usize) -> (PathBuf, Accumulator) {
        use std::io::Write;
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        let mut acc = Accumulator::default();
        for i in 0..lines {
            let entry = LogEntry::new(Utc::now(), Default::default(), format!("line {i}"));
            let mut bytes = serde_json::to_vec(&entry).unwrap();
            bytes.push(b'\n');
            f.write_all(&bytes).unwrap();
            acc.record_for_test(&entry, bytes.len() as u64);
        }
        (path, acc)
    }

    // Expose a test-only wrapper since `record` is crate-private and the
    // accumulator's bookkeeping is exercised directly in writer.rs tests.
    impl Accumulator {
        fn record_for_test(&mut self, entry: &LogEntry, len: u64) {
            self.lines += 1;
            self.bytes += len;
            self.min_ts = Some(self.min_ts.map_or(entry.ts, |m| m.min(entry.ts)));
            self.max_ts = Some(self.max_ts.map_or(entry.ts, |m| m.max(entry.ts)));
        }
    }

    #[test]
    fn rotate_compresses_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let (path, acc) = write_plain_file(dir.path(), "2024-01-01T000000-000.jsonl", 5);
        let metrics = Registry::new();

        rotate(dir.path(), &path, acc, &metrics).unwrap();

        assert!(!path.exists(), "plain file removed after compression");
        let zst_path = dir.path().join("2024-01-01T000000-000.jsonl.zst");
        assert!(zst_path.exists());

        let entries = index::read_all(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lines, 5);
    }

    #[test]
    fn disk_cap_evicts_oldest_until_under_cap() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Registry::new();

        for i in 0..3 {
            let name = format!("2024-01-01T00000{i}-000.jsonl");
            let (path, acc) = write_plain_file(dir.path(), &name, 20);
            rotate(dir.path(), &path, acc, &metrics).unwrap();
        }

        let before = index::read_all(dir.path()).unwrap();
        assert_eq!(before.len(), 3);
        let total: u64 = before.iter().map(|e| e.bytes).sum();

        let evicted = enforce_disk_cap(dir.path(), total / 2, 0, &metrics).unwrap();
        assert!(!evicted.is_empty());

        let after = index::read_all(dir.path()).unwrap();
        assert!(after.len() < 3);
        let after_total: u64 = after.iter().map(|e| e.bytes).sum();
        assert!(after_total <= total / 2 || after.len() == 1);
    }
}
