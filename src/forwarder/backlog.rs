//! FIFO backlog of failed batches, bounded by a byte cap.
//!
//! Mirrors the `Buffer` role described for the forwarder: `add` evicts from
//! the head until the new batch fits, `drain` hands back the queue oldest
//! first so a retried push can re-enqueue a still-failing batch at the tail.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::metrics::Registry;
use crate::model::Batch;

pub struct Backlog {
    queue: Mutex<VecDeque<Batch>>,
    cap_bytes: usize,
    size_bytes: Mutex<usize>,
}

impl Backlog {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cap_bytes,
            size_bytes: Mutex::new(0),
        }
    }

    /// Enqueue `batch`, evicting from the head until it fits. Every eviction
    /// increments `backlog_drops_total`. A batch that alone exceeds `cap_bytes`
    /// is dropped rather than admitted over cap.
    pub fn add(&self, batch: Batch, metrics: &Registry) {
        let batch_size = batch.approx_wire_bytes();
        if batch_size > self.cap_bytes {
            metrics.inc_backlog_drop();
            return;
        }

        let mut queue = self.queue.lock().unwrap();
        let mut size = self.size_bytes.lock().unwrap();

        while *size + batch_size > self.cap_bytes {
            match queue.pop_front() {
                Some(evicted) => {
                    *size -= evicted.approx_wire_bytes();
                    metrics.inc_backlog_drop();
                }
                None => break,
            }
        }

        *size += batch_size;
        queue.push_back(batch);
    }

    /// Remove and return every queued batch, oldest first.
    pub fn drain(&self) -> Vec<Batch> {
        let mut queue = self.queue.lock().unwrap();
        let mut size = self.size_bytes.lock().unwrap();
        *size = 0;
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        *self.size_bytes.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;
    use chrono::Utc;

    fn batch_of(n: usize) -> Batch {
        let mut b = Batch::new(Labels::new());
        for _ in 0..n {
            b.lines.push((Utc::now(), "x".repeat(50)));
        }
        b
    }

    #[test]
    fn add_evicts_from_head_to_respect_cap() {
        let metrics = Registry::new();
        let backlog = Backlog::new(200);
        for _ in 0..10 {
            backlog.add(batch_of(1), &metrics);
        }
        assert!(backlog.size_bytes() <= 200);
        assert!(metrics.backlog_drops_total.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[test]
    fn add_drops_single_batch_larger_than_cap() {
        let metrics = Registry::new();
        let backlog = Backlog::new(100);
        backlog.add(batch_of(10), &metrics);
        assert_eq!(backlog.len(), 0);
        assert_eq!(backlog.size_bytes(), 0);
        assert!(metrics.backlog_drops_total.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[test]
    fn drain_returns_oldest_first_and_empties_queue() {
        let metrics = Registry::new();
        let backlog = Backlog::new(10_000);
        backlog.add(batch_of(1), &metrics);
        backlog.add(batch_of(2), &metrics);
        let drained = backlog.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].lines.len(), 1);
        assert!(backlog.is_empty());
    }
}
