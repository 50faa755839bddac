//! Batch assembly: a single task drains the tail fan-in channel and groups
//! lines into per-container `Batch`es, flushing on size, container change,
//! a timer tick, or channel close.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::model::{Batch, Labels};

pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub pod_name: String,
    pub namespace: String,
    pub session: String,
}

fn labels_for(config: &BatchConfig, container: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert("container".to_string(), container.to_string());
    labels.insert("pod".to_string(), config.pod_name.clone());
    labels.insert("namespace".to_string(), config.namespace.clone());
    labels.insert("session".to_string(), config.session.clone());
    labels
}

/// Drains `rx` until it closes, emitting flushed `Batch`es on `out`. Returns
/// once `rx` is closed and the final partial batch (if any) has flushed.
pub async fn run_batcher(
    mut rx: mpsc::Receiver<(String, DateTime<Utc>, String)>,
    config: BatchConfig,
    out: mpsc::Sender<Batch>,
) {
    let mut current_container: Option<String> = None;
    let mut buf: Vec<(DateTime<Utc>, String)> = Vec::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;

            line = rx.recv() => {
                match line {
                    Some((container, ts, msg)) => {
                        if current_container.as_deref() != Some(container.as_str()) {
                            flush(&mut buf, &current_container, &config, &out).await;
                            current_container = Some(container);
                        }
                        buf.push((ts, msg));
                        if buf.len() >= config.batch_size {
                            flush(&mut buf, &current_container, &config, &out).await;
                        }
                    }
                    None => {
                        flush(&mut buf, &current_container, &config, &out).await;
                        return;
                    }
                }
            }

            _ = ticker.tick() => {
                flush(&mut buf, &current_container, &config, &out).await;
            }
        }
    }
}

async fn flush(
    buf: &mut Vec<(DateTime<Utc>, String)>,
    container: &Option<String>,
    config: &BatchConfig,
    out: &mpsc::Sender<Batch>,
) {
    if buf.is_empty() {
        return;
    }
    let container = match container {
        Some(c) => c,
        None => return,
    };
    let mut batch = Batch::new(labels_for(config, container));
    batch.lines = std::mem::take(buf);
    let _ = out.send(batch).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchConfig {
        BatchConfig {
            batch_size: 3,
            flush_interval: Duration::from_secs(3600),
            pod_name: "pod-1".to_string(),
            namespace: "default".to_string(),
            session: "sess-1".to_string(),
        }
    }

    #[tokio::test]
    async fn flushes_on_batch_size() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_batcher(rx, config(), out_tx));

        for i in 0..3 {
            tx.send(("api".to_string(), Utc::now(), format!("line {i}"))).await.unwrap();
        }
        let batch = out_rx.recv().await.unwrap();
        assert_eq!(batch.lines.len(), 3);
        assert_eq!(batch.labels["container"], "api");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn flushes_on_container_change() {
        let (tx, rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_batcher(rx, config(), out_tx));

        tx.send(("api".to_string(), Utc::now(), "a".to_string())).await.unwrap();
        tx.send(("web".to_string(), Utc::now(), "b".to_string())).await.unwrap();
        drop(tx);

        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.labels["container"], "api");
        assert_eq!(first.lines.len(), 1);

        let second = out_rx.recv().await.unwrap();
        assert_eq!(second.labels["container"], "web");

        handle.await.unwrap();
    }
}
