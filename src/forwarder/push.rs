//! Push loop: convert a `Batch` to the receiver's Loki-push wire shape and
//! POST it, with exponential backoff on network errors and 5xx, no retry on
//! 4xx, and a hard drop (never retried) on oversize batches.

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

use crate::error::BufferExceededError;
use crate::metrics::Registry;
use crate::model::{Batch, LokiStream, MAX_BATCH_WIRE_BYTES};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum PushOutcome {
    Sent,
    /// Client error (4xx) — bad payload, not retried.
    Rejected(u16),
    /// Exhausted retries against network errors / 5xx.
    RetriesExhausted,
    /// Batch exceeds the wire-size cap; dropped without ever attempting a push.
    BufferExceeded,
}

pub struct Pusher {
    client: Client,
    target: String,
    max_retries: u32,
}

impl Pusher {
    pub fn new(target: String, max_retries: u32, tls_skip_verify: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .danger_accept_invalid_certs(tls_skip_verify)
            .build()?;
        Ok(Self {
            client,
            target,
            max_retries,
        })
    }

    pub async fn push(&self, batch: &Batch, metrics: &Registry) -> PushOutcome {
        if batch.approx_wire_bytes() > MAX_BATCH_WIRE_BYTES {
            let err = BufferExceededError {
                size: batch.approx_wire_bytes(),
                limit: MAX_BATCH_WIRE_BYTES,
            };
            tracing::error!(%err, "dropping batch that exceeds the wire-size cap");
            return PushOutcome::BufferExceeded;
        }

        let body = to_loki_payload(batch);
        let url = format!("{}/loki/api/v1/push", self.target.trim_end_matches('/'));

        let mut attempt = 0u32;
        loop {
            let start = std::time::Instant::now();
            let result = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await;
            metrics.observe_push_duration(start.elapsed());

            match result {
                Ok(resp) if resp.status().is_success() => {
                    metrics.inc_batches_sent();
                    return PushOutcome::Sent;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    metrics.inc_push_error();
                    return PushOutcome::Rejected(resp.status().as_u16());
                }
                _ => {
                    metrics.inc_push_error();
                    if attempt >= self.max_retries {
                        return PushOutcome::RetriesExhausted;
                    }
                    let backoff = 1u64
                        .checked_shl(attempt)
                        .map(Duration::from_secs)
                        .unwrap_or(MAX_BACKOFF)
                        .min(MAX_BACKOFF);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn to_loki_payload(batch: &Batch) -> Vec<u8> {
    let stream = LokiStream {
        stream: batch.labels.clone(),
        values: batch
            .lines
            .iter()
            .map(|(ts, msg)| (ts.timestamp_nanos_opt().unwrap_or(0).to_string(), msg.clone()))
            .collect(),
    };
    let req = crate::model::LokiPushRequest { streams: vec![stream] };
    serde_json::to_vec(&req).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;
    use chrono::Utc;

    #[test]
    fn oversize_batch_maps_to_buffer_exceeded_without_network() {
        let mut batch = Batch::new(Labels::new());
        batch.lines.push((Utc::now(), "x".repeat(MAX_BATCH_WIRE_BYTES + 1)));
        assert!(batch.approx_wire_bytes() > MAX_BATCH_WIRE_BYTES);
    }

    #[test]
    fn to_loki_payload_round_trips_labels_and_lines() {
        let mut labels = Labels::new();
        labels.insert("container".to_string(), "api".to_string());
        let mut batch = Batch::new(labels);
        batch.lines.push((Utc::now(), "hello".to_string()));

        let bytes = to_loki_payload(&batch);
        let decoded: crate::model::LokiPushRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.streams[0].stream["container"], "api");
        assert_eq!(decoded.streams[0].values[0].1, "hello");
    }
}
