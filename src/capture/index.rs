//! `index.jsonl`: one `IndexEntry` per line, UTF-8 JSON, no trailing comma.
//!
//! Appends are fsync'd by the rotator. Eviction rewrites the whole file via
//! write-temp + rename rather than truncating in place, so a crash mid-evict
//! never leaves a torn index.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::model::IndexEntry;

pub const INDEX_FILENAME: &str = "index.jsonl";

pub fn path_in(dir: &Path) -> std::path::PathBuf {
    dir.join(INDEX_FILENAME)
}

/// Read all entries. Corrupt lines are skipped (best-effort), matching the
/// "skip with warning" contract readers apply to evicted-file races.
pub fn read_all(dir: &Path) -> Result<Vec<IndexEntry>> {
    let path = path_in(dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading line from {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<IndexEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("skipping corrupt index line in {}: {}", path.display(), e);
            }
        }
    }
    Ok(entries)
}

/// Append one entry and fsync — the atomic-with-respect-to-readers step of
/// rotation. Readers only ever see either the entry or not.
pub fn append(dir: &Path, entry: &IndexEntry) -> Result<()> {
    let path = path_in(dir);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.sync_all()
        .with_context(|| format!("fsync {}", path.display()))?;
    Ok(())
}

/// Rewrite the index with the given entries: write-temp + rename, so an
/// eviction crash never leaves a torn file in place of the original.
pub fn rewrite_atomic(dir: &Path, entries: &[IndexEntry]) -> Result<()> {
    let path = path_in(dir);
    let tmp_path = dir.join(format!(".{INDEX_FILENAME}.tmp"));
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&serde_json::to_string(entry)?);
        buf.push('\n');
    }
    std::fs::write(&tmp_path, buf.as_bytes())
        .with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("renaming {} -> {}", tmp_path.display(), path.display()))?;
    Ok(())
}

/// Drop the oldest (first) entry, rewriting the file atomically. Returns the
/// evicted entry, if any.
pub fn evict_oldest(dir: &Path) -> Result<Option<IndexEntry>> {
    let mut entries = read_all(dir)?;
    if entries.is_empty() {
        return Ok(None);
    }
    let evicted = entries.remove(0);
    rewrite_atomic(dir, &entries)?;
    Ok(Some(evicted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn entry(file: &str) -> IndexEntry {
        IndexEntry {
            file: file.to_string(),
            from: Utc::now(),
            to: Utc::now(),
            lines: 10,
            bytes: 1000,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn append_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), &entry("a.jsonl.zst")).unwrap();
        append(dir.path(), &entry("b.jsonl.zst")).unwrap();
        let entries = read_all(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file, "a.jsonl.zst");
        assert_eq!(entries[1].file, "b.jsonl.zst");
    }

    #[test]
    fn corrupt_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), &entry("a.jsonl.zst")).unwrap();
        let path = path_in(dir.path());
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{not valid json").unwrap();
        append(dir.path(), &entry("b.jsonl.zst")).unwrap();

        let entries = read_all(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn evict_oldest_removes_first_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        append(dir.path(), &entry("a.jsonl.zst")).unwrap();
        append(dir.path(), &entry("b.jsonl.zst")).unwrap();
        append(dir.path(), &entry("c.jsonl.zst")).unwrap();

        let evicted = evict_oldest(dir.path()).unwrap().unwrap();
        assert_eq!(evicted.file, "a.jsonl.zst");

        let remaining = read_all(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].file, "b.jsonl.zst");
    }

    #[test]
    fn missing_index_is_recoverable_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_all(dir.path()).unwrap().len(), 0);
    }
}
