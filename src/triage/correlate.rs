//! Cross-service error correlation: for each ordered pair of services, find
//! the lag (in correlation windows) maximizing the Pearson correlation of
//! their per-window error counts, and classify the relationship.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::{Filter, Reader};
use crate::model::Labels;
use crate::triage::normalize::is_error;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_LAG: usize = 6;
/// One week of minute buckets; the cap named in the correlation spec, reused
/// here as a cap on 10-second correlation buckets for the same reason
/// (bounding memory on arbitrarily long captures).
const MAX_TIMELINE_BUCKETS: usize = 10_080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    CoFailure,
    CascadeTimeout,
    CascadeError,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub service_a: String,
    pub service_b: String,
    pub lag_windows: usize,
    pub rho: f64,
    pub pattern: Pattern,
}

#[derive(Debug, Default)]
struct ServiceTimeline {
    per_window_errors: BTreeMap<DateTime<Utc>, u64>,
    first_error_msg: Option<String>,
}

fn service_key(labels: &Labels) -> String {
    if let Some(v) = labels.get("app") {
        return v.clone();
    }
    labels
        .iter()
        .next()
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

fn floor_to_window(ts: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ms = window.as_millis().max(1) as i64;
    let ms = ts.timestamp_millis();
    let floored = ms.div_euclid(window_ms) * window_ms;
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Was the timeline truncated to stay within `MAX_TIMELINE_BUCKETS`? Callers
/// must surface this, not silently drop the tail of a long capture.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub pairs: Vec<CorrelationResult>,
    pub truncated: bool,
}

pub fn correlate(dir: &Path, window: Duration, max_lag: usize) -> Result<CorrelationReport> {
    let reader = Reader::open(dir)?;
    let mut timelines: BTreeMap<String, ServiceTimeline> = BTreeMap::new();

    reader.scan(&Filter::default(), |entry| {
        if !is_error(&entry.msg) {
            return true;
        }
        let key = service_key(&entry.labels);
        let timeline = timelines.entry(key).or_default();
        *timeline
            .per_window_errors
            .entry(floor_to_window(entry.ts, window))
            .or_insert(0) += 1;
        if timeline.first_error_msg.is_none() {
            timeline.first_error_msg = Some(entry.msg.clone());
        }
        true
    })?;

    if timelines.len() < 2 {
        return Ok(CorrelationReport {
            pairs: Vec::new(),
            truncated: false,
        });
    }

    let global_from = timelines
        .values()
        .filter_map(|t| t.per_window_errors.keys().next().copied())
        .min();
    let global_to = timelines
        .values()
        .filter_map(|t| t.per_window_errors.keys().next_back().copied())
        .max();

    let (Some(from), Some(to)) = (global_from, global_to) else {
        return Ok(CorrelationReport {
            pairs: Vec::new(),
            truncated: false,
        });
    };

    let step = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(10));
    let mut buckets = Vec::new();
    let mut cursor = from;
    while cursor <= to && buckets.len() < MAX_TIMELINE_BUCKETS {
        buckets.push(cursor);
        cursor += step;
    }
    let truncated = cursor <= to;

    let series: BTreeMap<String, Vec<f64>> = timelines
        .iter()
        .map(|(name, t)| {
            let vec = buckets
                .iter()
                .map(|b| *t.per_window_errors.get(b).unwrap_or(&0) as f64)
                .collect();
            (name.clone(), vec)
        })
        .collect();

    let names: Vec<String> = series.keys().cloned().collect();
    let mut best_direction: BTreeMap<(String, String), CorrelationResult> = BTreeMap::new();

    for a in &names {
        for b in &names {
            if a == b {
                continue;
            }
            let xs = &series[a];
            let ys = &series[b];
            let Some((lag, rho)) = best_lag_correlation(xs, ys, max_lag) else {
                continue;
            };
            if rho <= 0.5 {
                continue;
            }

            let pattern = classify_pattern(lag, a, b, &timelines);
            let result = CorrelationResult {
                service_a: a.clone(),
                service_b: b.clone(),
                lag_windows: lag,
                rho,
                pattern,
            };

            let unordered_key = if a < b {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            best_direction
                .entry(unordered_key)
                .and_modify(|existing| {
                    if result.rho > existing.rho {
                        *existing = result.clone();
                    }
                })
                .or_insert(result);
        }
    }

    Ok(CorrelationReport {
        pairs: best_direction.into_values().collect(),
        truncated,
    })
}

/// Pearson correlation between `xs` and `ys` shifted forward by `lag`
/// buckets, for `lag` in `0..=max_lag`; returns the lag with the highest
/// correlation.
fn best_lag_correlation(xs: &[f64], ys: &[f64], max_lag: usize) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        if lag >= xs.len() {
            break;
        }
        let a = &xs[..xs.len() - lag];
        let b = &ys[lag..];
        if a.len() < 2 {
            continue;
        }
        let rho = pearson(a, b);
        if best.map(|(_, best_rho)| rho > best_rho).unwrap_or(true) {
            best = Some((lag, rho));
        }
    }
    best
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        // Both vectors constant and positive: treat as perfectly correlated
        // rather than undefined. Small co-failure captures often have every
        // window at a flat nonzero count, and calling that "no correlation"
        // would bury the signal.
        if var_x == 0.0 && var_y == 0.0 && mean_x > 0.0 && mean_y > 0.0 {
            return 1.0;
        }
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn classify_pattern(
    lag: usize,
    a: &str,
    b: &str,
    timelines: &BTreeMap<String, ServiceTimeline>,
) -> Pattern {
    if lag == 0 {
        return Pattern::CoFailure;
    }
    let mentions_other = |service: &str, other: &str| -> bool {
        timelines
            .get(service)
            .and_then(|t| t.first_error_msg.as_ref())
            .map(|msg| msg.to_lowercase().contains(&other.to_lowercase()))
            .unwrap_or(false)
    };
    if mentions_other(a, b) || mentions_other(b, a) {
        Pattern::CascadeTimeout
    } else {
        Pattern::CascadeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_perfect_positive_correlation() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_one_constant_series_is_zero() {
        let xs = vec![1.0, 1.0, 1.0];
        let ys = vec![1.0, 2.0, 3.0];
        assert_eq!(pearson(&xs, &ys), 0.0);
    }

    #[test]
    fn pearson_both_constant_positive_is_one() {
        let xs = vec![3.0, 3.0, 3.0];
        let ys = vec![5.0, 5.0, 5.0];
        assert_eq!(pearson(&xs, &ys), 1.0);
    }

    #[test]
    fn pearson_both_constant_zero_is_zero() {
        let xs = vec![0.0, 0.0, 0.0];
        let ys = vec![0.0, 0.0, 0.0];
        assert_eq!(pearson(&xs, &ys), 0.0);
    }

    #[test]
    fn best_lag_finds_shifted_correlation() {
        let xs = vec![0.0, 10.0, 0.0, 0.0, 0.0];
        let ys = vec![0.0, 0.0, 10.0, 0.0, 0.0];
        let (lag, rho) = best_lag_correlation(&xs, &ys, 3).unwrap();
        assert_eq!(lag, 1);
        assert!(rho > 0.9);
    }
}
