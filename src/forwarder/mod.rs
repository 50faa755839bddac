//! Forwarder sidecar: tail every container in a pod, batch lines, and push
//! them to a receiver, surviving transient outages behind a bounded backlog.

pub mod backlog;
pub mod batch;
pub mod push;
pub mod tail;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{mpsc, watch};

use crate::config::ForwarderConfig;
use crate::metrics::Registry;
use crate::model::Batch;

use backlog::Backlog;
use batch::{run_batcher, BatchConfig};
use push::{PushOutcome, Pusher};
use tail::{discover_containers, tail_container};

const FORWARDER_CONTAINER_NAME: &str = "logtap-forwarder";

/// Run the forwarder until SIGINT/SIGTERM. Blocks for the process lifetime.
pub async fn run(config: ForwarderConfig) -> Result<()> {
    let metrics = Arc::new(Registry::new());
    let pod_log_root = config
        .log_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("/var/log/pods"));

    let containers = discover_containers(&pod_log_root, FORWARDER_CONTAINER_NAME);
    if containers.is_empty() {
        tracing::warn!(
            root = %pod_log_root.display(),
            "no containers discovered to tail"
        );
    }
    for c in &containers {
        tracing::info!(container = %c.name, path = %c.log_path.display(), "tailing container");
    }

    let (line_tx, line_rx) = mpsc::channel(4096);
    let (batch_tx, mut batch_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tailers = Vec::new();
    for container in containers {
        let tx = line_tx.clone();
        let rx = shutdown_rx.clone();
        let poll_interval = config.tail_poll_interval;
        tailers.push(tokio::spawn(async move {
            if let Err(e) = tail_container(container, tx, poll_interval, rx).await {
                tracing::warn!("tailer exited: {e:#}");
            }
        }));
    }
    drop(line_tx);

    let batcher_config = BatchConfig {
        batch_size: config.batch_size,
        flush_interval: config.flush_interval,
        pod_name: config.pod_name.clone(),
        namespace: config.namespace.clone(),
        session: config.session.clone(),
    };
    let batcher = tokio::spawn(run_batcher(line_rx, batcher_config, batch_tx));

    let pusher = Pusher::new(config.target.clone(), config.retry_max, config.tls_skip_verify)?;
    let backlog = Arc::new(Backlog::new(config.buffer_size_bytes));

    let mut drain_timer = tokio::time::interval(config.backlog_drain_interval);
    drain_timer.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_signal() => {
                tracing::info!("forwarder shutdown signal received");
                break;
            }

            batch = batch_rx.recv() => {
                match batch {
                    Some(batch) => push_or_backlog(batch, &pusher, &backlog, &metrics).await,
                    None => {
                        tracing::info!("batcher closed, forwarder exiting");
                        break;
                    }
                }
            }

            _ = drain_timer.tick(), if !backlog.is_empty() => {
                drain_backlog(&pusher, &backlog, &metrics).await;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for t in tailers {
        let _ = t.await;
    }
    drop(batch_rx);
    let _ = batcher.await;

    let deadline = Instant::now() + config.drain_timeout;
    while !backlog.is_empty() && Instant::now() < deadline {
        drain_backlog(&pusher, &backlog, &metrics).await;
    }
    if !backlog.is_empty() {
        tracing::warn!(
            remaining = backlog.len(),
            "drain_timeout elapsed with batches still backlogged"
        );
    }

    Ok(())
}

async fn push_or_backlog(batch: Batch, pusher: &Pusher, backlog: &Backlog, metrics: &Registry) {
    match pusher.push(&batch, metrics).await {
        PushOutcome::Sent => {
            if !backlog.is_empty() {
                drain_backlog(pusher, backlog, metrics).await;
            }
        }
        PushOutcome::Rejected(status) => {
            tracing::warn!(status, "batch rejected, not retrying");
        }
        PushOutcome::RetriesExhausted => {
            backlog.add(batch, metrics);
        }
        PushOutcome::BufferExceeded => {}
    }
}

/// Re-push every backlogged batch, oldest first. A batch that fails again
/// goes back on the tail (re-draining `Backlog::add`'s FIFO contract).
async fn drain_backlog(pusher: &Pusher, backlog: &Backlog, metrics: &Registry) {
    for batch in backlog.drain() {
        match pusher.push(&batch, metrics).await {
            PushOutcome::Sent => {}
            PushOutcome::Rejected(_) | PushOutcome::BufferExceeded => {}
            PushOutcome::RetriesExhausted => backlog.add(batch, metrics),
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm.recv() => {},
    }
}
