//! Writer: single consumer of the bounded ingest channel. Exclusive owner of
//! the active file descriptor; never touched by any other task.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::model::{IndexEntry, LogEntry};

/// Running stats for the file currently being written, reset on rotation.
#[derive(Debug, Default)]
pub struct Accumulator {
    pub lines: u64,
    pub bytes: u64,
    pub labels: BTreeMap<String, BTreeMap<String, u64>>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
}

impl Accumulator {
    fn record(&mut self, entry: &LogEntry, serialized_len: u64) {
        self.lines += 1;
        self.bytes += serialized_len;
        self.min_ts = Some(self.min_ts.map_or(entry.ts, |m| m.min(entry.ts)));
        self.max_ts = Some(self.max_ts.map_or(entry.ts, |m| m.max(entry.ts)));
        for (k, v) in &entry.labels {
            *self
                .labels
                .entry(k.clone())
                .or_default()
                .entry(v.clone())
                .or_insert(0) += 1;
        }
    }

    /// Build the `IndexEntry` this accumulator describes, once the file it
    /// tracks has been closed and compressed under `file_name`.
    pub fn into_index_entry(self, file_name: String) -> IndexEntry {
        let now = Utc::now();
        IndexEntry {
            file: file_name,
            from: self.min_ts.unwrap_or(now),
            to: self.max_ts.unwrap_or(now),
            lines: self.lines,
            bytes: self.bytes,
            labels: self.labels,
        }
    }
}

/// `YYYY-MM-DDTHHMMSS-NNN.jsonl[.zst]` — timestamp-prefixed so lexical sort
/// equals chronological sort.
pub fn data_filename(ts: DateTime<Utc>, seq: u32, compressed: bool) -> String {
    let stamp = ts.format("%Y-%m-%dT%H%M%S");
    let ext = if compressed { "jsonl.zst" } else { "jsonl" };
    format!("{stamp}-{seq:03}.{ext}")
}

pub enum RotateReason {
    Size,
    Age,
}

pub struct Writer {
    dir: PathBuf,
    file: BufWriter<File>,
    path: PathBuf,
    seq: u32,
    opened_at: Instant,
    unflushed_lines: u32,
    pub acc: Accumulator,
    pub rotate_threshold_bytes: u64,
    pub rotate_max_age: std::time::Duration,
}

impl Writer {
    pub fn open_new(
        dir: &Path,
        seq: u32,
        rotate_threshold_bytes: u64,
        rotate_max_age: std::time::Duration,
    ) -> Result<Self> {
        let now = Utc::now();
        let name = data_filename(now, seq, false);
        let path = dir.join(&name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("opening active file {}", path.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            file: BufWriter::new(file),
            path,
            seq,
            opened_at: Instant::now(),
            unflushed_lines: 0,
            acc: Accumulator::default(),
            rotate_threshold_bytes,
            rotate_max_age,
        })
    }

    pub fn active_path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Append one entry as a compact NDJSON line. Flushes every 64 lines or
    /// on a clean rotation boundary — not every line, to avoid a syscall per
    /// log line under load.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.acc.record(entry, line.len() as u64);
        self.unflushed_lines += 1;
        if self.unflushed_lines >= 64 {
            self.file.flush()?;
            self.unflushed_lines = 0;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.unflushed_lines = 0;
        Ok(())
    }

    /// Size/age rotation triggers. Checked after every append.
    pub fn should_rotate(&self) -> Option<RotateReason> {
        if self.acc.bytes >= self.rotate_threshold_bytes {
            Some(RotateReason::Size)
        } else if self.opened_at.elapsed() >= self.rotate_max_age {
            Some(RotateReason::Age)
        } else {
            None
        }
    }

    /// Flush and fsync the active file — step 1 of the rotation procedure.
    /// Consumes `self`, returning what the rotator needs to finish the job.
    pub fn close_for_rotation(mut self) -> Result<(PathBuf, Accumulator, u32)> {
        self.flush()?;
        self.file.get_ref().sync_all().with_context(|| {
            format!("fsync active file {}", self.path.display())
        })?;
        Ok((self.path, self.acc, self.seq))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;
    use std::time::Duration;

    fn entry(msg: &str) -> LogEntry {
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "api".to_string());
        LogEntry::new(Utc::now(), labels, msg)
    }

    #[test]
    fn append_updates_accumulator() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = Writer::open_new(dir.path(), 0, 1024 * 1024, Duration::from_secs(900)).unwrap();
        w.append(&entry("hello")).unwrap();
        w.append(&entry("world")).unwrap();
        assert_eq!(w.acc.lines, 2);
        assert!(w.acc.bytes > 0);
        assert_eq!(w.acc.labels["app"]["api"], 2);
    }

    #[test]
    fn rotates_on_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = Writer::open_new(dir.path(), 0, 50, Duration::from_secs(900)).unwrap();
        for _ in 0..10 {
            w.append(&entry("x".repeat(20).as_str())).unwrap();
            if w.should_rotate().is_some() {
                break;
            }
        }
        assert!(matches!(w.should_rotate(), Some(RotateReason::Size)));
    }

    #[test]
    fn filename_sorts_chronologically() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(5);
        let n1 = data_filename(t1, 0, false);
        let n2 = data_filename(t2, 0, false);
        assert!(n1 < n2);
    }
}
