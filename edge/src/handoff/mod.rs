//! Durable edge→forge hand-off: a bounded drop-oldest queue feeding a
//! single writer task (spec §4.8).

pub mod failover;
pub mod queue;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pixl_common::Hit;
use tokio::sync::watch;

use queue::DropOldestQueue;
use writer::{ConnState, HandoffWriter};

/// Request-path handle: non-blocking enqueue only. Cloning is cheap (an
/// `Arc` underneath); every axum handler holds one.
#[derive(Clone)]
pub struct HandoffChannel {
    writer: Arc<HandoffWriter>,
}

impl HandoffChannel {
    #[must_use]
    pub fn new(endpoint_name: &str, queue_capacity: usize, failover_directory: &str) -> Self {
        let queue = Arc::new(DropOldestQueue::new(queue_capacity));
        let writer = Arc::new(HandoffWriter::new(
            PathBuf::from(endpoint_name),
            queue,
            PathBuf::from(failover_directory),
        ));
        Self { writer }
    }

    /// Enqueue a hit for hand-off. Never blocks; at capacity the oldest
    /// queued hit is dropped.
    pub fn enqueue(&self, hit: Hit) {
        self.writer.enqueue(hit);
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.writer.state()
    }

    #[must_use]
    pub fn primary_dropped_count(&self) -> u64 {
        self.writer.primary_dropped_count()
    }

    #[must_use]
    pub fn failover_queue_depth(&self) -> usize {
        self.writer.failover_queue_depth()
    }

    /// Start the background writer task. Returns a shutdown sender: send
    /// `true` to begin a graceful drain.
    pub fn spawn_writer(&self, shutdown_timeout: Duration) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        let writer = Arc::clone(&self.writer);
        tokio::spawn(writer.run(rx, shutdown_timeout));
        tx
    }
}
