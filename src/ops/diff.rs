//! Side-by-side and baseline/current capture comparison.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::triage::scan::{self, ShardResult, TriageConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideSummary {
    pub lines: u64,
    pub errors: u64,
    pub error_rate: f64,
}

impl SideSummary {
    fn from_shard(shard: &ShardResult) -> Self {
        let error_rate = if shard.total == 0 {
            0.0
        } else {
            shard.errors as f64 / shard.total as f64
        };
        Self {
            lines: shard.total,
            errors: shard.errors,
            error_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBucket {
    pub bucket: DateTime<Utc>,
    pub rate_a: f64,
    pub rate_b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub a: SideSummary,
    pub b: SideSummary,
    pub labels_only_in_a: Vec<String>,
    pub labels_only_in_b: Vec<String>,
    pub signatures_only_in_a: Vec<(String, u64)>,
    pub signatures_only_in_b: Vec<(String, u64)>,
    pub rate_buckets: Vec<RateBucket>,
}

/// label `k=v` pairs observed as talkers, used for set comparison.
fn label_pairs(shard: &ShardResult) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for (key, values) in &shard.talkers {
        for value in values.keys() {
            out.insert(format!("{key}={value}"));
        }
    }
    out
}

fn top_signatures_only(shard: &ShardResult, other: &ShardResult, n: usize) -> Vec<(String, u64)> {
    let mut only: Vec<(String, u64)> = shard
        .signatures
        .iter()
        .filter(|(sig, _)| !other.signatures.contains_key(*sig))
        .map(|(sig, stats)| (sig.clone(), stats.count))
        .collect();
    only.sort_by(|a, b| b.1.cmp(&a.1));
    only.truncate(n);
    only
}

pub fn diff(a: &Path, b: &Path) -> Result<DiffReport> {
    let config = TriageConfig::default();
    let shard_a = scan::run(a, &config)?;
    let shard_b = scan::run(b, &config)?;

    let labels_a = label_pairs(&shard_a);
    let labels_b = label_pairs(&shard_b);

    let mut buckets: BTreeSet<DateTime<Utc>> = shard_a.per_window_total.keys().copied().collect();
    buckets.extend(shard_b.per_window_total.keys().copied());

    let rate_buckets = buckets
        .into_iter()
        .map(|bucket| {
            let rate_a = bucket_rate(&shard_a, bucket);
            let rate_b = bucket_rate(&shard_b, bucket);
            RateBucket { bucket, rate_a, rate_b }
        })
        .collect();

    Ok(DiffReport {
        a: SideSummary::from_shard(&shard_a),
        b: SideSummary::from_shard(&shard_b),
        labels_only_in_a: labels_a.difference(&labels_b).cloned().collect(),
        labels_only_in_b: labels_b.difference(&labels_a).cloned().collect(),
        signatures_only_in_a: top_signatures_only(&shard_a, &shard_b, 20),
        signatures_only_in_b: top_signatures_only(&shard_b, &shard_a, 20),
        rate_buckets,
    })
}

fn bucket_rate(shard: &ShardResult, bucket: DateTime<Utc>) -> f64 {
    let total = shard.per_window_total.get(&bucket).copied().unwrap_or(0);
    if total == 0 {
        return 0.0;
    }
    let errors = shard.per_window_errors.get(&bucket).copied().unwrap_or(0);
    errors as f64 / total as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Improvement,
    Regression,
    Different,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPattern {
    pub signature: String,
    pub baseline_count: u64,
    pub current_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineDiff {
    pub error_rate_change_pct: f64,
    pub volume_change_pct: f64,
    pub new_error_patterns: Vec<NewPattern>,
    pub label_deltas_added: Vec<String>,
    pub label_deltas_removed: Vec<String>,
    pub verdict: Verdict,
    pub confidence: f64,
}

pub fn baseline_diff(base: &Path, current: &Path) -> Result<BaselineDiff> {
    let config = TriageConfig::default();
    let base_shard = scan::run(base, &config)?;
    let cur_shard = scan::run(current, &config)?;

    let base_rate = if base_shard.total == 0 {
        0.0
    } else {
        base_shard.errors as f64 / base_shard.total as f64
    };
    let cur_rate = if cur_shard.total == 0 {
        0.0
    } else {
        cur_shard.errors as f64 / cur_shard.total as f64
    };

    let error_rate_change_pct = if base_rate == 0.0 {
        if cur_rate > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (cur_rate - base_rate) / base_rate * 100.0
    };

    let volume_change_pct = if base_shard.total == 0 {
        if cur_shard.total > 0 {
            100.0
        } else {
            0.0
        }
    } else {
        (cur_shard.total as f64 - base_shard.total as f64) / base_shard.total as f64 * 100.0
    };

    let mut new_error_patterns: Vec<NewPattern> = Vec::new();
    for (sig, stats) in &cur_shard.signatures {
        let baseline_count = base_shard.signatures.get(sig).map(|s| s.count).unwrap_or(0);
        let is_new = baseline_count == 0;
        let is_worse = baseline_count > 0 && stats.count >= baseline_count * 2;
        if is_new || is_worse {
            new_error_patterns.push(NewPattern {
                signature: sig.clone(),
                baseline_count,
                current_count: stats.count,
            });
        }
    }
    new_error_patterns.sort_by(|a, b| b.current_count.cmp(&a.current_count));

    let labels_base = label_pairs(&base_shard);
    let labels_cur = label_pairs(&cur_shard);
    let label_deltas_added: Vec<String> = labels_cur.difference(&labels_base).cloned().collect();
    let label_deltas_removed: Vec<String> = labels_base.difference(&labels_cur).cloned().collect();

    let has_new_patterns = !new_error_patterns.is_empty();
    let verdict = if error_rate_change_pct <= -20.0 {
        Verdict::Improvement
    } else if error_rate_change_pct > 50.0 && has_new_patterns {
        Verdict::Regression
    } else if (volume_change_pct.abs() > 50.0 && error_rate_change_pct.abs() <= 50.0)
        || (error_rate_change_pct > 0.0 && !has_new_patterns && error_rate_change_pct > 20.0)
    {
        Verdict::Different
    } else if error_rate_change_pct.abs() <= 20.0 && !has_new_patterns {
        Verdict::Stable
    } else {
        Verdict::Different
    };

    let dominant = match verdict {
        Verdict::Improvement | Verdict::Regression => error_rate_change_pct.abs(),
        Verdict::Different => volume_change_pct.abs().max(error_rate_change_pct.abs()),
        Verdict::Stable => 0.0,
    };
    // Monotone in the dominant metric's magnitude, clamped to (0, 1].
    let confidence = (dominant / 100.0).clamp(0.05, 1.0);

    Ok(BaselineDiff {
        error_rate_change_pct,
        volume_change_pct,
        new_error_patterns,
        label_deltas_added,
        label_deltas_removed,
        verdict,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{metadata, rotator, writer::Writer};
    use crate::metrics::Registry;
    use crate::model::{Labels, LogEntry, Metadata};
    use std::time::Duration;

    fn write_n(dir: &Path, lines: &[(&str, bool)]) {
        metadata::write_atomic(dir, &Metadata::new_live(Utc::now(), None)).unwrap();
        let mut w = Writer::open_new(dir, 0, u64::MAX, Duration::from_secs(3600)).unwrap();
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "api".to_string());
        for (msg, _) in lines {
            w.append(&LogEntry::new(Utc::now(), labels.clone(), msg.to_string()))
                .unwrap();
        }
        let (path, acc, _) = w.close_for_rotation().unwrap();
        rotator::rotate(dir, &path, acc, &Registry::new()).unwrap();
    }

    #[test]
    fn baseline_diff_flags_regression_with_new_pattern() {
        let base = tempfile::tempdir().unwrap();
        let cur = tempfile::tempdir().unwrap();

        let mut base_lines = vec![("connection refused by upstream", true)];
        base_lines.extend(std::iter::repeat(("ok", false)).take(19));
        write_n(base.path(), &base_lines);

        let mut cur_lines = vec![("connection refused by upstream", true); 5];
        cur_lines.extend(vec![("oomkilled: container exceeded limit", true); 5]);
        cur_lines.extend(std::iter::repeat(("ok", false)).take(10));
        write_n(cur.path(), &cur_lines);

        let result = baseline_diff(base.path(), cur.path()).unwrap();
        assert_eq!(result.verdict, Verdict::Regression);
        assert!(result.confidence >= 0.7);
        assert!(result
            .new_error_patterns
            .iter()
            .any(|p| p.signature.contains("oomkilled") && p.baseline_count == 0));
    }

    #[test]
    fn diff_reports_per_side_summaries() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_n(a.path(), &[("ok", false), ("ok", false)]);
        write_n(b.path(), &[("error: boom", true)]);

        let report = diff(a.path(), b.path()).unwrap();
        assert_eq!(report.a.lines, 2);
        assert_eq!(report.b.lines, 1);
        assert_eq!(report.b.errors, 1);
    }
}
