//! Process-wide metrics registry exposed as Prometheus text on `/metrics`.
//!
//! The metrics registry is the one justified piece of global state in this
//! crate — every subsystem receives a `&Registry` explicitly rather than
//! reaching for a global singleton.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Atomic counters + a small histogram for push duration.
#[derive(Default)]
pub struct Registry {
    pub lines_received: AtomicU64,
    pub lines_redacted: AtomicU64,
    pub drops_total: AtomicU64,
    pub malformed_total: AtomicU64,
    pub rotations_total: AtomicU64,
    pub rotations_evicted_total: AtomicU64,
    pub batches_sent_total: AtomicU64,
    pub push_errors_total: AtomicU64,
    pub backlog_drops_total: AtomicU64,
    redactions_by_pattern: Mutex<BTreeMap<String, u64>>,
    push_duration_buckets: Mutex<Histogram>,
}

/// Fixed-bucket histogram (seconds), matching Prometheus' cumulative `le` convention.
struct Histogram {
    bucket_bounds: Vec<f64>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Default for Histogram {
    fn default() -> Self {
        let bucket_bounds = vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
        let counts = vec![0; bucket_bounds.len()];
        Self {
            bucket_bounds,
            counts,
            sum: 0.0,
            count: 0,
        }
    }
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        for (i, bound) in self.bucket_bounds.iter().enumerate() {
            if value <= *bound {
                self.counts[i] += 1;
            }
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_lines_received(&self, n: u64) {
        self.lines_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_redaction(&self, pattern: &str) {
        self.lines_redacted.fetch_add(1, Ordering::Relaxed);
        let mut map = self.redactions_by_pattern.lock().unwrap();
        *map.entry(pattern.to_string()).or_insert(0) += 1;
    }

    pub fn inc_drop(&self) {
        self.drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.malformed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rotation(&self) {
        self.rotations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evicted(&self) {
        self.rotations_evicted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches_sent(&self) {
        self.batches_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_push_error(&self) {
        self.push_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_backlog_drop(&self) {
        self.backlog_drops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_push_duration(&self, d: Duration) {
        self.push_duration_buckets
            .lock()
            .unwrap()
            .observe(d.as_secs_f64());
    }

    /// Render as Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP logtap_lines_received_total Lines accepted by the ingest endpoints.\n");
        out.push_str("# TYPE logtap_lines_received_total counter\n");
        out.push_str(&format!(
            "logtap_lines_received_total {}\n",
            self.lines_received.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_lines_redacted_total Lines with at least one redaction applied.\n");
        out.push_str("# TYPE logtap_lines_redacted_total counter\n");
        out.push_str(&format!(
            "logtap_lines_redacted_total {}\n",
            self.lines_redacted.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_redactions_total Redactions applied, by pattern.\n");
        out.push_str("# TYPE logtap_redactions_total counter\n");
        for (pattern, count) in self.redactions_by_pattern.lock().unwrap().iter() {
            out.push_str(&format!(
                "logtap_redactions_total{{pattern=\"{pattern}\"}} {count}\n"
            ));
        }

        out.push_str("# HELP logtap_drops_total Lines dropped due to a full writer channel.\n");
        out.push_str("# TYPE logtap_drops_total counter\n");
        out.push_str(&format!(
            "logtap_drops_total {}\n",
            self.drops_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_malformed_total Lines rejected for malformed input.\n");
        out.push_str("# TYPE logtap_malformed_total counter\n");
        out.push_str(&format!(
            "logtap_malformed_total {}\n",
            self.malformed_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_rotations_total Completed rotations.\n");
        out.push_str("# TYPE logtap_rotations_total counter\n");
        out.push_str(&format!(
            "logtap_rotations_total {}\n",
            self.rotations_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_rotations_evicted_total Files evicted to satisfy the disk cap.\n");
        out.push_str("# TYPE logtap_rotations_evicted_total counter\n");
        out.push_str(&format!(
            "logtap_rotations_evicted_total {}\n",
            self.rotations_evicted_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_batches_sent_total Forwarder batches successfully pushed.\n");
        out.push_str("# TYPE logtap_batches_sent_total counter\n");
        out.push_str(&format!(
            "logtap_batches_sent_total {}\n",
            self.batches_sent_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_push_errors_total Forwarder push attempts that failed.\n");
        out.push_str("# TYPE logtap_push_errors_total counter\n");
        out.push_str(&format!(
            "logtap_push_errors_total {}\n",
            self.push_errors_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP logtap_backlog_drops_total Backlogged batches evicted to respect the byte cap.\n");
        out.push_str("# TYPE logtap_backlog_drops_total counter\n");
        out.push_str(&format!(
            "logtap_backlog_drops_total {}\n",
            self.backlog_drops_total.load(Ordering::Relaxed)
        ));

        let hist = self.push_duration_buckets.lock().unwrap();
        out.push_str("# HELP logtap_push_duration_seconds Ingest push handler duration.\n");
        out.push_str("# TYPE logtap_push_duration_seconds histogram\n");
        let mut cumulative = 0u64;
        for (bound, count) in hist.bucket_bounds.iter().zip(hist.counts.iter()) {
            cumulative = cumulative.max(*count);
            out.push_str(&format!(
                "logtap_push_duration_seconds_bucket{{le=\"{bound}\"}} {cumulative}\n"
            ));
        }
        out.push_str(&format!(
            "logtap_push_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            hist.count
        ));
        out.push_str(&format!(
            "logtap_push_duration_seconds_sum {}\n",
            hist.sum
        ));
        out.push_str(&format!("logtap_push_duration_seconds_count {}\n", hist.count));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_counters() {
        let reg = Registry::new();
        reg.inc_lines_received(5);
        reg.inc_redaction("email");
        reg.inc_drop();
        let text = reg.render();
        assert!(text.contains("logtap_lines_received_total 5"));
        assert!(text.contains("pattern=\"email\"} 1"));
        assert!(text.contains("logtap_drops_total 1"));
    }

    #[test]
    fn histogram_cumulative_buckets_are_monotonic() {
        let reg = Registry::new();
        reg.observe_push_duration(Duration::from_millis(2));
        reg.observe_push_duration(Duration::from_millis(300));
        let hist = reg.push_duration_buckets.lock().unwrap();
        let mut prev = 0u64;
        for c in &hist.counts {
            assert!(*c >= prev);
            prev = *c;
        }
    }
}
