//! Wires the bounded channel to a dedicated writer thread — the "one writer
//! goroutine, exclusive owner of the active file" from the concurrency model.
//!
//! The HTTP handlers (async, on the tokio runtime) only ever `try_send`; the
//! writer thread is a plain OS thread doing blocking file I/O, which keeps
//! disk stalls from ever touching the async executor.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::capture::writer::Writer;
use crate::capture::{index, metadata, rotator};
use crate::config::ReceiverConfig;
use crate::metrics::Registry;
use crate::model::{LogEntry, Metadata};

const FLUSH_TICK: Duration = Duration::from_millis(100);

pub struct IngestPipeline {
    sender: crossbeam_channel::Sender<LogEntry>,
    metrics: Arc<Registry>,
    capacity: usize,
    handle: Option<JoinHandle<()>>,
}

impl IngestPipeline {
    pub fn spawn(config: &ReceiverConfig, metrics: Arc<Registry>) -> Result<Self> {
        std::fs::create_dir_all(&config.capture_dir)
            .with_context(|| format!("creating capture dir {}", config.capture_dir.display()))?;

        if metadata::read(&config.capture_dir).is_err() {
            let redaction = if config.redact_patterns.is_empty() {
                None
            } else {
                Some(crate::model::RedactionMetadata {
                    patterns: config.redact_patterns.clone(),
                })
            };
            metadata::write_atomic(&config.capture_dir, &Metadata::new_live(Utc::now(), redaction))?;
        }

        let next_seq = index::read_all(&config.capture_dir)?
            .len()
            .try_into()
            .unwrap_or(0u32);

        let (sender, receiver) = crossbeam_channel::bounded::<LogEntry>(config.channel_capacity);

        let dir = config.capture_dir.clone();
        let disk_cap = config.disk_cap_bytes;
        let rotate_threshold = config.rotate_threshold_bytes;
        let rotate_max_age = config.rotate_max_age;
        let thread_metrics = metrics.clone();

        let handle = std::thread::Builder::new()
            .name("logtap-writer".to_string())
            .spawn(move || {
                writer_loop(
                    &dir,
                    next_seq,
                    rotate_threshold,
                    rotate_max_age,
                    disk_cap,
                    receiver,
                    thread_metrics,
                );
            })
            .expect("spawning writer thread");

        Ok(Self {
            sender,
            metrics,
            capacity: config.channel_capacity,
            handle: Some(handle),
        })
    }

    /// Non-blocking enqueue. Returns `false` (and increments `drops_total`)
    /// when the channel is full — the HTTP handler must never block here.
    pub fn try_enqueue(&self, entry: LogEntry) -> bool {
        match self.sender.try_send(entry) {
            Ok(()) => true,
            Err(_) => {
                self.metrics.inc_drop();
                false
            }
        }
    }

    /// Fraction of channel capacity currently occupied, for `/readyz`.
    pub fn queue_fill_ratio(&self) -> f64 {
        self.sender.len() as f64 / self.capacity.max(1) as f64
    }

    /// Stop HTTP accept has already happened by the time this is called;
    /// this drains the channel, performs a final rotation, and writes the
    /// capture's `stopped` timestamp.
    pub fn shutdown(mut self) {
        drop(self.sender);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(
    dir: &std::path::Path,
    start_seq: u32,
    rotate_threshold: u64,
    rotate_max_age: Duration,
    disk_cap: u64,
    receiver: crossbeam_channel::Receiver<LogEntry>,
    metrics: Arc<Registry>,
) {
    let mut writer = match Writer::open_new(dir, start_seq, rotate_threshold, rotate_max_age) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("writer thread failed to open active file: {}", e);
            return;
        }
    };

    loop {
        match receiver.recv_timeout(FLUSH_TICK) {
            Ok(entry) => {
                if let Err(e) = writer.append(&entry) {
                    tracing::error!("writer append failed: {}", e);
                }
                if let Some(_reason) = writer.should_rotate() {
                    writer = rotate_and_reopen(writer, dir, rotate_threshold, rotate_max_age, disk_cap, &metrics);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if let Err(e) = writer.flush() {
                    tracing::warn!("periodic flush failed: {}", e);
                }
                if writer.should_rotate().is_some() {
                    writer = rotate_and_reopen(writer, dir, rotate_threshold, rotate_max_age, disk_cap, &metrics);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Final rotation + metadata close, mirroring the shutdown sequence:
    // drain writer channel -> rotate active file -> write stopped timestamp.
    match writer.close_for_rotation() {
        Ok((path, acc, _seq)) => {
            if acc.lines > 0 {
                if let Err(e) = rotator::rotate(dir, &path, acc, &metrics) {
                    tracing::error!("final rotation failed: {}", e);
                }
                let _ = rotator::enforce_disk_cap(dir, disk_cap, 0, &metrics);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
        Err(e) => tracing::error!("final flush/fsync failed: {}", e),
    }

    if let Ok(mut meta) = metadata::read(dir) {
        let entries = index::read_all(dir).unwrap_or_default();
        meta.total_lines = entries.iter().map(|e| e.lines).sum();
        meta.total_bytes = entries.iter().map(|e| e.bytes).sum();
        let mut labels_seen: std::collections::BTreeSet<String> = Default::default();
        for e in &entries {
            labels_seen.extend(e.labels.keys().cloned());
        }
        meta.labels_seen = labels_seen.into_iter().collect();
        meta.stopped = Some(Utc::now());
        if let Err(e) = metadata::write_atomic(dir, &meta) {
            tracing::error!("failed to write final metadata: {}", e);
        }
    }
}

fn rotate_and_reopen(
    writer: Writer,
    dir: &std::path::Path,
    rotate_threshold: u64,
    rotate_max_age: Duration,
    disk_cap: u64,
    metrics: &Registry,
) -> Writer {
    let next_seq = writer.seq() + 1;
    match writer.close_for_rotation() {
        Ok((path, acc, seq)) => {
            if let Err(e) = rotator::rotate(dir, &path, acc, metrics) {
                tracing::error!("rotation failed for seq {}: {}", seq, e);
            }
            if let Err(e) = rotator::enforce_disk_cap(dir, disk_cap, 0, metrics) {
                tracing::error!("disk cap enforcement failed: {}", e);
            }
        }
        Err(e) => tracing::error!("close-for-rotation failed: {}", e),
    }
    match Writer::open_new(dir, next_seq, rotate_threshold, rotate_max_age) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("failed to reopen active file after rotation: {}", e);
            // Degrade rather than panic: retry with the same sequence number.
            Writer::open_new(dir, next_seq, rotate_threshold, rotate_max_age)
                .expect("cannot recover writer after repeated open failure")
        }
    }
}
