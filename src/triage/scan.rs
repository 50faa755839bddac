//! Parallel per-file triage scan: one worker per file, merged into a single
//! shard, with a serial catch-up pass for files rotated in mid-scan.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::capture::{CaptureFile, Reader};
use crate::triage::normalize::{is_error, normalize_message};

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub jobs: usize,
    pub window: Duration,
    pub top: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            window: Duration::from_secs(60),
            top: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureStats {
    pub count: u64,
    pub first_seen: DateTime<Utc>,
}

/// Per-file (or merged) triage shard: totals, an error timeline bucketed by
/// `window`, normalized-signature counts, and per-label-value talker counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardResult {
    pub total: u64,
    pub errors: u64,
    pub per_window_errors: BTreeMap<DateTime<Utc>, u64>,
    pub per_window_total: BTreeMap<DateTime<Utc>, u64>,
    pub signatures: BTreeMap<String, SignatureStats>,
    pub talkers: BTreeMap<String, BTreeMap<String, u64>>,
}

impl ShardResult {
    fn record(&mut self, ts: DateTime<Utc>, msg: &str, labels: &crate::model::Labels, window: Duration) {
        self.total += 1;
        *self.per_window_total.entry(floor_to_window(ts, window)).or_insert(0) += 1;
        for (k, v) in labels {
            *self
                .talkers
                .entry(k.clone())
                .or_default()
                .entry(v.clone())
                .or_insert(0) += 1;
        }
        if is_error(msg) {
            self.errors += 1;
            *self.per_window_errors.entry(floor_to_window(ts, window)).or_insert(0) += 1;
            let signature = normalize_message(msg);
            self.signatures
                .entry(signature)
                .and_modify(|s| {
                    s.count += 1;
                    if ts < s.first_seen {
                        s.first_seen = ts;
                    }
                })
                .or_insert(SignatureStats {
                    count: 1,
                    first_seen: ts,
                });
        }
    }

    pub fn merge(mut self, other: ShardResult) -> ShardResult {
        self.total += other.total;
        self.errors += other.errors;
        for (bucket, count) in other.per_window_errors {
            *self.per_window_errors.entry(bucket).or_insert(0) += count;
        }
        for (bucket, count) in other.per_window_total {
            *self.per_window_total.entry(bucket).or_insert(0) += count;
        }
        for (sig, stats) in other.signatures {
            self.signatures
                .entry(sig)
                .and_modify(|s| {
                    s.count += stats.count;
                    if stats.first_seen < s.first_seen {
                        s.first_seen = stats.first_seen;
                    }
                })
                .or_insert(stats);
        }
        for (key, values) in other.talkers {
            let dest = self.talkers.entry(key).or_default();
            for (value, count) in values {
                *dest.entry(value).or_insert(0) += count;
            }
        }
        self
    }

    pub fn top_signatures(&self, n: usize) -> Vec<(&String, &SignatureStats)> {
        let mut all: Vec<_> = self.signatures.iter().collect();
        all.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        all.truncate(n);
        all
    }
}

fn floor_to_window(ts: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ms = window.as_millis().max(1) as i64;
    let ts_ms = ts.timestamp_millis();
    let floored = ts_ms.div_euclid(window_ms) * window_ms;
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

fn scan_one_file(reader: &Reader, file: &CaptureFile, window: Duration) -> Result<ShardResult> {
    let mut shard = ShardResult::default();
    reader.scan_file(file, |entry| {
        shard.record(entry.ts, &entry.msg, &entry.labels, window);
        true
    })?;
    Ok(shard)
}

/// Step 1 (parallel scan) + step 2 (catch-up) + step 3 (merge) of the triage
/// procedure. Returns the merged shard; file-level errors (a file vanishing
/// mid-scan due to rotation/eviction) degrade to an empty per-file result
/// rather than aborting the whole run.
pub fn run(dir: &Path, config: &TriageConfig) -> Result<ShardResult> {
    let reader = Reader::open(dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.max(1))
        .build()?;

    let scanned_names: HashSet<String> = reader.files().iter().map(|f| f.file_name()).collect();

    let merged = pool.install(|| {
        reader
            .files()
            .par_iter()
            .map(|file| scan_one_file(&reader, file, config.window).unwrap_or_default())
            .reduce(ShardResult::default, ShardResult::merge)
    });

    // Catch-up: re-open the index; anything not in the originally scanned
    // set is new since the scan started and gets merged in serially.
    let reader_after = Reader::open(dir)?;
    let mut merged = merged;
    for file in reader_after.files() {
        if scanned_names.contains(&file.file_name()) {
            continue;
        }
        let shard = scan_one_file(&reader_after, file, config.window).unwrap_or_default();
        merged = merged.merge(shard);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{metadata, writer::Writer};
    use crate::model::{Labels, LogEntry, Metadata};
    use chrono::TimeZone;

    fn write_capture(dir: &Path) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        let mut w = Writer::open_new(dir, 0, u64::MAX, Duration::from_secs(3600)).unwrap();
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "api".to_string());
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        w.append(&LogEntry::new(base, labels.clone(), "connection refused by upstream"))
            .unwrap();
        w.append(&LogEntry::new(base, labels.clone(), "request ok"))
            .unwrap();
        w.append(&LogEntry::new(
            base + chrono::Duration::seconds(30),
            labels,
            "connection refused by upstream",
        ))
        .unwrap();
        let (path, acc, _) = w.close_for_rotation().unwrap();
        crate::capture::rotator::rotate(dir, &path, acc, &crate::metrics::Registry::new()).unwrap();
    }

    #[test]
    fn merges_totals_and_signatures() {
        let dir = tempfile::tempdir().unwrap();
        write_capture(dir.path());

        let config = TriageConfig {
            jobs: 2,
            ..Default::default()
        };
        let shard = run(dir.path(), &config).unwrap();

        assert_eq!(shard.total, 3);
        assert_eq!(shard.errors, 2);
        assert_eq!(shard.signatures.len(), 1);
        let top = shard.top_signatures(10);
        assert_eq!(top[0].1.count, 2);
    }

    #[test]
    fn talkers_count_label_values() {
        let dir = tempfile::tempdir().unwrap();
        write_capture(dir.path());
        let shard = run(dir.path(), &TriageConfig::default()).unwrap();
        assert_eq!(shard.talkers["app"]["api"], 3);
    }
}
