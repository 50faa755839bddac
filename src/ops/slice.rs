//! Produce a new capture directory containing only the entries a filter
//! matches.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::capture::writer::Writer;
use crate::capture::{metadata, rotator, Filter, Reader};
use crate::metrics::Registry;
use crate::model::Metadata;

/// Scans `src` with `filter`, writes matching entries into a fresh capture
/// at `dest`. Timestamps are re-aggregated from the matching entries alone;
/// redaction metadata is copied from the source capture unchanged.
pub fn slice(src: &Path, dest: &Path, filter: &Filter) -> Result<u64> {
    std::fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;

    let reader = Reader::open(src)?;
    let metrics = Registry::new();

    // A generous rotation threshold: slices are meant to be small,
    // self-contained subsets, not re-rotated multi-file captures.
    let mut writer = Writer::open_new(dest, 0, u64::MAX, Duration::from_secs(u64::MAX))?;
    let mut written = 0u64;

    reader.scan(filter, |entry| {
        if writer.append(entry).is_ok() {
            written += 1;
        }
        true
    })?;

    if written > 0 {
        let (path, acc, _seq) = writer.close_for_rotation()?;
        rotator::rotate(dest, &path, acc, &metrics)?;
    } else {
        let _ = std::fs::remove_file(writer.active_path());
    }

    let mut meta = Metadata::new_live(reader.metadata.started, reader.metadata.redaction.clone());
    meta.stopped = Some(Utc::now());
    meta.total_lines = written;
    if written > 0 {
        let entries = crate::capture::index::read_all(dest)?;
        meta.total_bytes = entries.iter().map(|e| e.bytes).sum();
        let mut labels_seen: std::collections::BTreeSet<String> = Default::default();
        for e in &entries {
            labels_seen.extend(e.labels.keys().cloned());
        }
        meta.labels_seen = labels_seen.into_iter().collect();
    }
    metadata::write_atomic(dest, &meta)?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, LogEntry};

    fn make_source(dir: &Path) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        let mut w = Writer::open_new(dir, 0, u64::MAX, Duration::from_secs(3600)).unwrap();
        for i in 0..10 {
            let mut labels = Labels::new();
            labels.insert("app".to_string(), if i % 2 == 0 { "api" } else { "web" }.to_string());
            w.append(&LogEntry::new(Utc::now(), labels, format!("line {i}"))).unwrap();
        }
        let (path, acc, _) = w.close_for_rotation().unwrap();
        rotator::rotate(dir, &path, acc, &Registry::new()).unwrap();
    }

    #[test]
    fn slice_writes_only_matching_entries() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        make_source(src.path());

        let mut filter = Filter::default();
        filter.labels.insert("app".to_string(), "web".to_string());

        let written = slice(src.path(), dest.path(), &filter).unwrap();
        assert_eq!(written, 5);

        let reader = Reader::open(dest.path()).unwrap();
        assert_eq!(reader.metadata.total_lines, 5);
    }
}
