//! Core wire/disk data model shared by every subsystem.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short string → short string label map. Never generalized to arbitrary
/// values — label sets are fingerprinted by sorted-key concatenation.
pub type Labels = BTreeMap<String, String>;

/// One decoded log line. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub labels: Labels,
    pub msg: String,
}

impl LogEntry {
    pub fn new(ts: DateTime<Utc>, labels: Labels, msg: impl Into<String>) -> Self {
        Self {
            ts,
            labels,
            msg: msg.into(),
        }
    }

    /// Fingerprint of the label set: sorted `k=v,k=v` concatenation.
    pub fn label_fingerprint(&self) -> String {
        fingerprint(&self.labels)
    }
}

pub fn fingerprint(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Ingest-side grouping: one label set plus the ordered lines sharing it.
/// Wire size must stay ≤ 1 MiB; oversize batches are rejected, not split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub labels: Labels,
    pub lines: Vec<(DateTime<Utc>, String)>,
}

pub const MAX_BATCH_WIRE_BYTES: usize = 1024 * 1024;

impl Batch {
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            lines: Vec::new(),
        }
    }

    /// Approximate wire size: sum of line bytes plus label overhead.
    pub fn approx_wire_bytes(&self) -> usize {
        let label_bytes: usize = self.labels.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
        let line_bytes: usize = self.lines.iter().map(|(_, l)| l.len() + 24).sum();
        label_bytes + line_bytes + 16
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        let labels = self.labels;
        self.lines
            .into_iter()
            .map(|(ts, msg)| LogEntry::new(ts, labels.clone(), msg))
            .collect()
    }
}

/// Wire shape accepted by `POST /loki/api/v1/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiPushRequest {
    pub streams: Vec<LokiStream>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiStream {
    pub stream: Labels,
    pub values: Vec<(String, String)>,
}

/// Wire shape accepted by `POST /logtap/raw`, one per NDJSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLogRecord {
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub labels: Labels,
    pub msg: String,
}

/// One rotated file's descriptor, appended to `index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub lines: u64,
    pub bytes: u64,
    /// labelKey -> labelValue -> count
    pub labels: BTreeMap<String, BTreeMap<String, u64>>,
}

/// Capture-wide record written to `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    pub format: String,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<DateTime<Utc>>,
    pub total_lines: u64,
    pub total_bytes: u64,
    pub labels_seen: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction: Option<RedactionMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionMetadata {
    pub patterns: Vec<String>,
}

impl Metadata {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new_live(started: DateTime<Utc>, redaction: Option<RedactionMetadata>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            format: "logtap-capture".to_string(),
            started,
            stopped: None,
            total_lines: 0,
            total_bytes: 0,
            labels_seen: Vec::new(),
            redaction,
        }
    }

    pub fn is_live(&self) -> bool {
        self.stopped.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_sorted_by_key() {
        let mut labels = Labels::new();
        labels.insert("pod".to_string(), "web-1".to_string());
        labels.insert("app".to_string(), "web".to_string());
        assert_eq!(fingerprint(&labels), "app=web,pod=web-1");
    }

    #[test]
    fn batch_wire_size_grows_with_lines() {
        let mut b = Batch::new(Labels::new());
        let empty = b.approx_wire_bytes();
        b.lines.push((Utc::now(), "x".repeat(100)));
        assert!(b.approx_wire_bytes() > empty);
    }
}
