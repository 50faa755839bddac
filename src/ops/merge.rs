//! Combine N capture directories into one, by byte-copying data files (no
//! re-compression) and rebuilting a sorted index + union metadata.

use std::path::Path;

use anyhow::{Context, Result};

use crate::capture::writer::data_filename;
use crate::capture::{index, metadata};
use crate::model::{IndexEntry, Metadata};

pub fn merge(sources: &[&Path], dest: &Path) -> Result<u64> {
    std::fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;

    let mut metas: Vec<Metadata> = Vec::new();
    let mut paired: Vec<(IndexEntry, &Path)> = Vec::new();

    for src in sources {
        let meta = metadata::read(src).with_context(|| format!("reading metadata for {}", src.display()))?;
        let entries = index::read_all(src).with_context(|| format!("reading index for {}", src.display()))?;
        for entry in entries {
            paired.push((entry, src));
        }
        metas.push(meta);
    }

    paired.sort_by(|a, b| a.0.from.cmp(&b.0.from));

    let mut dest_entries = Vec::with_capacity(paired.len());
    for (seq, (entry, src_dir)) in paired.into_iter().enumerate() {
        let src_path = src_dir.join(&entry.file);
        let compressed = entry.file.ends_with(".zst");
        let new_name = data_filename(entry.from, seq as u32, compressed);
        let dest_path = dest.join(&new_name);
        std::fs::copy(&src_path, &dest_path)
            .with_context(|| format!("copying {} -> {}", src_path.display(), dest_path.display()))?;

        let mut new_entry = entry;
        new_entry.file = new_name;
        dest_entries.push(new_entry);
    }

    index::rewrite_atomic(dest, &dest_entries)?;

    let total_lines = dest_entries.iter().map(|e| e.lines).sum();
    let total_bytes = dest_entries.iter().map(|e| e.bytes).sum();
    let mut labels_seen: std::collections::BTreeSet<String> = Default::default();
    for e in &dest_entries {
        labels_seen.extend(e.labels.keys().cloned());
    }

    let started = metas.iter().map(|m| m.started).min().unwrap_or_else(chrono::Utc::now);
    let stopped = if metas.iter().all(|m| m.stopped.is_some()) {
        metas.iter().filter_map(|m| m.stopped).max()
    } else {
        None
    };
    let redaction = metas.iter().find_map(|m| m.redaction.clone());

    let dest_meta = Metadata {
        version: Metadata::CURRENT_VERSION,
        format: "logtap-capture".to_string(),
        started,
        stopped,
        total_lines,
        total_bytes,
        labels_seen: labels_seen.into_iter().collect(),
        redaction,
    };
    metadata::write_atomic(dest, &dest_meta)?;

    Ok(total_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{rotator, writer::Writer};
    use crate::metrics::Registry;
    use crate::model::{Labels, LogEntry};
    use chrono::Utc;
    use std::time::Duration;

    fn make_capture(dir: &Path, label_value: &str) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        let mut w = Writer::open_new(dir, 0, u64::MAX, Duration::from_secs(3600)).unwrap();
        let mut labels = Labels::new();
        labels.insert("app".to_string(), label_value.to_string());
        for i in 0..3 {
            w.append(&LogEntry::new(Utc::now(), labels.clone(), format!("line {i}")))
                .unwrap();
        }
        let (path, acc, _) = w.close_for_rotation().unwrap();
        rotator::rotate(dir, &path, acc, &Registry::new()).unwrap();
        // mark stopped so merge's all-stopped branch is exercised
        let mut meta = metadata::read(dir).unwrap();
        meta.stopped = Some(Utc::now());
        metadata::write_atomic(dir, &meta).unwrap();
    }

    #[test]
    fn merge_unions_labels_and_sums_lines() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        make_capture(a.path(), "api");
        make_capture(b.path(), "web");

        let total = merge(&[a.path(), b.path()], dest.path()).unwrap();
        assert_eq!(total, 6);

        let meta = metadata::read(dest.path()).unwrap();
        assert_eq!(meta.labels_seen, vec!["app".to_string()]);
        assert!(meta.stopped.is_some());

        let entries = index::read_all(dest.path()).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
