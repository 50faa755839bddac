//! Derived-window computations over a triage shard's per-minute error
//! timeline: the peak-error window, the likely incident start, and the
//! longest steady-state run.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::triage::scan::SignatureStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakErrorWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub error_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SteadyStateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: usize,
}

/// Fill gaps in a sparse per-bucket timeline so sliding windows and medians
/// see zero-error minutes too. Empty input yields an empty vec.
fn fill_timeline(timeline: &BTreeMap<DateTime<Utc>, u64>, bucket: Duration) -> Vec<(DateTime<Utc>, u64)> {
    let Some((&first, _)) = timeline.iter().next() else {
        return Vec::new();
    };
    let (&last, _) = timeline.iter().next_back().unwrap();

    let step = chrono::Duration::from_std(bucket).unwrap_or(chrono::Duration::minutes(1));
    let mut filled = Vec::new();
    let mut cursor = first;
    while cursor <= last {
        filled.push((cursor, *timeline.get(&cursor).unwrap_or(&0)));
        cursor += step;
    }
    filled
}

/// Sliding window of `window_buckets` contiguous buckets maximizing the
/// summed error count; ties broken by the earliest start.
pub fn peak_error_window(
    timeline: &BTreeMap<DateTime<Utc>, u64>,
    bucket: Duration,
    window_buckets: usize,
) -> Option<PeakErrorWindow> {
    let filled = fill_timeline(timeline, bucket);
    if filled.is_empty() || window_buckets == 0 {
        return None;
    }
    let window_buckets = window_buckets.min(filled.len());

    let mut best: Option<PeakErrorWindow> = None;
    for start_idx in 0..=(filled.len() - window_buckets) {
        let slice = &filled[start_idx..start_idx + window_buckets];
        let sum: u64 = slice.iter().map(|(_, c)| c).sum();
        let candidate = PeakErrorWindow {
            start: slice[0].0,
            end: slice[slice.len() - 1].0,
            error_count: sum,
        };
        match &best {
            Some(b) if b.error_count >= candidate.error_count => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// The minute bearing the most `first_seen` timestamps across distinct
/// signatures; ties broken by the earliest minute.
pub fn incident_start(
    signatures: &BTreeMap<String, SignatureStats>,
    bucket: Duration,
) -> Option<DateTime<Utc>> {
    let window_ms = bucket.as_millis().max(1) as i64;
    let mut counts: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
    for stats in signatures.values() {
        let ms = stats.first_seen.timestamp_millis();
        let floored = ms.div_euclid(window_ms) * window_ms;
        let minute = DateTime::from_timestamp_millis(floored).unwrap_or(stats.first_seen);
        *counts.entry(minute).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(minute, _)| minute)
}

fn median(mut values: Vec<u64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] as f64 + values[mid] as f64) / 2.0
    } else {
        values[mid] as f64
    }
}

/// Longest run of consecutive buckets at or below the timeline's median
/// error count, required to span at least `min_minutes` buckets.
pub fn steady_state(
    timeline: &BTreeMap<DateTime<Utc>, u64>,
    bucket: Duration,
    min_minutes: usize,
) -> Option<SteadyStateWindow> {
    let filled = fill_timeline(timeline, bucket);
    if filled.is_empty() {
        return None;
    }
    let med = median(filled.iter().map(|(_, c)| *c).collect());

    let mut best: Option<(usize, usize)> = None; // (start_idx, len)
    let mut run_start = 0usize;
    let mut i = 0usize;
    while i < filled.len() {
        if (filled[i].1 as f64) <= med {
            if i == run_start || i == 0 || (filled[i - 1].1 as f64) > med {
                run_start = i;
            }
            let len = i - run_start + 1;
            if best.map(|(_, best_len)| len > best_len).unwrap_or(true) {
                best = Some((run_start, len));
            }
        }
        i += 1;
    }

    let (start_idx, len) = best?;
    if len < min_minutes {
        return None;
    }
    Some(SteadyStateWindow {
        start: filled[start_idx].0,
        end: filled[start_idx + len - 1].0,
        minutes: len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(n)
    }

    #[test]
    fn peak_error_window_picks_max_contiguous_sum() {
        let mut timeline = BTreeMap::new();
        for i in 0..10 {
            timeline.insert(minute(i), if i == 5 { 100 } else { 1 });
        }
        let peak = peak_error_window(&timeline, Duration::from_secs(60), 5).unwrap();
        assert!(peak.error_count >= 100);
        assert!(peak.start <= minute(5) && peak.end >= minute(5));
    }

    #[test]
    fn steady_state_requires_minimum_length() {
        let mut timeline = BTreeMap::new();
        for i in 0..10 {
            timeline.insert(minute(i), 1);
        }
        let steady = steady_state(&timeline, Duration::from_secs(60), 3).unwrap();
        assert_eq!(steady.minutes, 10);
    }

    #[test]
    fn steady_state_none_when_too_short() {
        let mut timeline = BTreeMap::new();
        timeline.insert(minute(0), 0);
        timeline.insert(minute(1), 100);
        let steady = steady_state(&timeline, Duration::from_secs(60), 3);
        assert!(steady.is_none());
    }
}
