// packages/engine/src/trap/sink.rs
//! Destinations for redirected console output
//!
//! [`QueueSink`] keeps a bounded lock-free buffer. When it is full the line
//! is dropped and counted, so a chatty subsystem never blocks on output.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Receives tagged lines from the print handler
pub trait LogSink: Send + Sync {
    fn emit(&self, tag: &str, message: &str);
}

/// Forwards each line to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, tag: &str, message: &str) {
        info!(target: "interpose::subsystem", "[{}]: {}", tag, message);
    }
}

/// A captured line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub tag: String,
    pub message: String,
}

pub struct QueueSink {
    queue: ArrayQueue<SinkRecord>,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl QueueSink {
    /// Capacity below one is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn try_pop(&self) -> Option<SinkRecord> {
        self.queue.pop()
    }

    /// Take everything buffered so far
    pub fn drain(&self) -> Vec<SinkRecord> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            buffered: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl LogSink for QueueSink {
    fn emit(&self, tag: &str, message: &str) {
        let record = SinkRecord {
            tag: tag.to_string(),
            message: message.to_string(),
        };
        match self.queue.push(record) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(record) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Sink full, dropped line from {} ({} dropped so far)", record.tag, dropped);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkStats {
    pub emitted: u64,
    pub dropped: u64,
    pub buffered: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue_sink_captures_in_order() {
        let sink = QueueSink::new(4);
        sink.emit("subsystem", "one");
        sink.emit("subsystem", "two");

        let lines: Vec<_> = sink.drain().into_iter().map(|r| r.message).collect();
        assert_eq!(lines, vec!["one", "two"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_queue_sink_drops_when_full() {
        let sink = QueueSink::new(2);
        for i in 0..5 {
            sink.emit("subsystem", &format!("line {}", i));
        }
        let stats = sink.stats();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.buffered, 2);
        assert_eq!(sink.try_pop().unwrap().message, "line 0");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let sink = QueueSink::new(0);
        sink.emit("t", "kept");
        assert_eq!(sink.stats().capacity, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_concurrent_emitters() {
        let sink = Arc::new(QueueSink::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..100 {
                        sink.emit("worker", &format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.stats().emitted, 400);
        assert_eq!(sink.drain().len(), 400);
    }
}
