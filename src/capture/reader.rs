//! Capture reader: the uniform read-side abstraction every analysis command
//! (triage, grep, slice, export, diff) builds on.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::capture::{index, metadata};
use crate::model::{IndexEntry, LogEntry, Metadata};

/// One file in a capture: either indexed (rotated, has an `IndexEntry`) or
/// orphan (on disk, not yet in the index — live tail or crashed capture).
#[derive(Debug, Clone)]
pub enum CaptureFile {
    Indexed(IndexEntry),
    Orphan { path: PathBuf },
}

impl CaptureFile {
    pub fn file_name(&self) -> String {
        match self {
            CaptureFile::Indexed(e) => e.file.clone(),
            CaptureFile::Orphan { path } => {
                path.file_name().unwrap().to_string_lossy().to_string()
            }
        }
    }
}

pub struct Reader {
    dir: PathBuf,
    pub metadata: Metadata,
    pub files: Vec<CaptureFile>,
}

impl Reader {
    /// Missing metadata is fatal; missing index is recoverable — every file
    /// on disk becomes an orphan.
    pub fn open(dir: &Path) -> Result<Self> {
        let metadata = metadata::read(dir).context("reading capture metadata")?;
        let entries = index::read_all(dir).unwrap_or_default();

        let indexed_names: std::collections::HashSet<String> =
            entries.iter().map(|e| e.file.clone()).collect();

        let mut files: Vec<CaptureFile> = entries.into_iter().map(CaptureFile::Indexed).collect();

        if let Ok(read_dir) = std::fs::read_dir(dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                if name == metadata::METADATA_FILENAME || name == index::INDEX_FILENAME {
                    continue;
                }
                if name.starts_with('.') || !(name.ends_with(".jsonl") || name.ends_with(".jsonl.zst")) {
                    continue;
                }
                if indexed_names.contains(&name) {
                    continue; // already represented via CaptureFile::Indexed
                }
                files.push(CaptureFile::Orphan { path });
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Σ `index.lines` plus a line count obtained by streaming orphan files.
    pub fn total_lines(&self) -> Result<u64> {
        let mut total = 0u64;
        for file in &self.files {
            match file {
                CaptureFile::Indexed(e) => total += e.lines,
                CaptureFile::Orphan { path } => {
                    total += count_lines(path).unwrap_or(0);
                }
            }
        }
        Ok(total)
    }

    /// Walk files in order, applying `filter.skip_file` to indexed files and
    /// `filter.match_entry` to every decoded line. `callback` returning
    /// `false` aborts the scan cleanly (not an error).
    pub fn scan<F>(&self, filter: &Filter, mut callback: F) -> Result<u64>
    where
        F: FnMut(&LogEntry) -> bool,
    {
        let mut scanned = 0u64;
        for file in &self.files {
            if filter.skip_file_entry(file) {
                continue;
            }
            let mut aborted = false;
            scanned += self.scan_file(file, |entry| {
                if !filter.match_entry(entry) {
                    return true;
                }
                let keep_going = callback(entry);
                aborted = !keep_going;
                keep_going
            })?;
            if aborted {
                break;
            }
        }
        Ok(scanned)
    }

    /// Scan a single file unconditionally (no filter applied at the file or
    /// entry level — callers that want filtering call `filter.match_entry`
    /// themselves). Used by triage's per-file parallel scan. Returns the
    /// number of successfully decoded lines, regardless of what `callback`
    /// returns for them.
    pub fn scan_file<F>(&self, file: &CaptureFile, mut callback: F) -> Result<u64>
    where
        F: FnMut(&LogEntry) -> bool,
    {
        let path = match file {
            CaptureFile::Indexed(entry) => self.dir.join(&entry.file),
            CaptureFile::Orphan { path } => path.clone(),
        };

        let lines = match open_lines(&path) {
            Ok(lines) => lines,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    tracing::warn!("skipping rotated-away file {}: {}", path.display(), e);
                    return Ok(0);
                }
                return Err(e.into());
            }
        };

        let mut decoded = 0u64;
        for line in lines {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue, // decode error on an individual line: skip
            };
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(_) => continue,
            };
            decoded += 1;
            if !callback(&entry) {
                break;
            }
        }
        Ok(decoded)
    }

    pub fn files(&self) -> &[CaptureFile] {
        &self.files
    }
}

fn count_lines(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    for line in open_lines(path)? {
        line?;
        total += 1;
    }
    Ok(total)
}

/// Stream a data file's lines, transparently decompressing `.zst` files.
fn open_lines(path: &Path) -> std::io::Result<Box<dyn Iterator<Item = std::io::Result<String>>>> {
    let file = File::open(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("zst") {
        let decoder = zstd::Decoder::new(file)?;
        Ok(Box::new(BufReader::new(decoder).lines()))
    } else {
        Ok(Box::new(BufReader::new(file).lines()))
    }
}

/// Four-field filter: inclusive time range, label conjunction, optional grep.
/// A default (all-`None`/empty) filter matches everything (FILTER-1).
#[derive(Default, Clone)]
pub struct Filter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub labels: std::collections::BTreeMap<String, String>,
    pub grep: Option<Regex>,
}

impl Filter {
    /// `skip_file` dispatch across both `CaptureFile` variants: orphans have
    /// no index entry to reason about, so they are never file-level-skipped.
    pub fn skip_file_entry(&self, file: &CaptureFile) -> bool {
        match file {
            CaptureFile::Indexed(entry) => self.skip_file(entry),
            CaptureFile::Orphan { .. } => false,
        }
    }

    /// Skip an entire indexed file without opening it, when possible.
    /// Never skips based on `grep` alone — grep requires reading entries.
    pub fn skip_file(&self, entry: &IndexEntry) -> bool {
        if let Some(to) = self.to {
            if to < entry.from {
                return true;
            }
        }
        if let Some(from) = self.from {
            if from > entry.to {
                return true;
            }
        }
        for (key, required_value) in &self.labels {
            if let Some(values) = entry.labels.get(key) {
                if !values.contains_key(required_value) {
                    return true;
                }
            }
        }
        false
    }

    /// Inclusive time range; labels all-must-match; grep matched on `msg`
    /// only (never on labels).
    pub fn match_entry(&self, entry: &LogEntry) -> bool {
        if let Some(from) = self.from {
            if entry.ts < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.ts > to {
                return false;
            }
        }
        for (key, value) in &self.labels {
            match entry.labels.get(key) {
                Some(v) if v == value => {}
                _ => return false,
            }
        }
        if let Some(re) = &self.grep {
            if !re.is_match(&entry.msg) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::writer::Writer;
    use crate::model::Labels;
    use std::time::Duration;

    fn make_capture(dir: &Path, lines_per_file: usize, files: usize) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        for f in 0..files {
            let mut w = Writer::open_new(dir, f as u32, u64::MAX, Duration::from_secs(3600)).unwrap();
            for i in 0..lines_per_file {
                let mut labels = Labels::new();
                labels.insert("app".to_string(), if i % 2 == 0 { "api" } else { "web" }.to_string());
                w.append(&LogEntry::new(Utc::now(), labels, format!("line {i}")))
                    .unwrap();
            }
            let (path, acc, _) = w.close_for_rotation().unwrap();
            crate::capture::rotator::rotate(dir, &path, acc, &crate::metrics::Registry::new()).unwrap();
        }
    }

    #[test]
    fn filter_1_empty_filter_matches_everything() {
        let filter = Filter::default();
        let entry = LogEntry::new(Utc::now(), Labels::new(), "anything");
        assert!(filter.match_entry(&entry));

        let index_entry = IndexEntry {
            file: "x.jsonl.zst".to_string(),
            from: Utc::now(),
            to: Utc::now(),
            lines: 1,
            bytes: 1,
            labels: Default::default(),
        };
        assert!(!filter.skip_file(&index_entry));
    }

    #[test]
    fn scan_1_yields_entries_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        make_capture(dir.path(), 5, 2);
        let reader = Reader::open(dir.path()).unwrap();

        let mut seen = Vec::new();
        reader
            .scan(&Filter::default(), |e| {
                seen.push(e.msg.clone());
                true
            })
            .unwrap();

        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], "line 0");
        assert_eq!(seen[4], "line 4");
    }

    #[test]
    fn scan_stops_cleanly_when_callback_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        make_capture(dir.path(), 5, 2);
        let reader = Reader::open(dir.path()).unwrap();

        let mut seen = 0;
        reader
            .scan(&Filter::default(), |_| {
                seen += 1;
                seen < 3
            })
            .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn missing_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Reader::open(dir.path()).is_err());
    }

    #[test]
    fn label_filter_excludes_non_matching_entries() {
        let dir = tempfile::tempdir().unwrap();
        make_capture(dir.path(), 4, 1);
        let reader = Reader::open(dir.path()).unwrap();

        let mut filter = Filter::default();
        filter.labels.insert("app".to_string(), "web".to_string());

        let mut count = 0;
        reader
            .scan(&filter, |_| {
                count += 1;
                true
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}
