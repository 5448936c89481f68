//! The handoff connection state machine (spec §4.10): a single writer
//! task owns the stream connection to the forge, spilling to disk on
//! failure and reconnecting with exponential backoff.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pixl_common::Hit;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use super::failover::FailoverWriter;
use super::queue::DropOldestQueue;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Draining = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Draining,
            _ => Self::Disconnected,
        }
    }
}

pub struct HandoffWriter {
    endpoint: PathBuf,
    queue: Arc<DropOldestQueue<Hit>>,
    failover_queue: Arc<DropOldestQueue<Hit>>,
    failover: Arc<FailoverWriter>,
    state: AtomicU8,
}

impl HandoffWriter {
    #[must_use]
    pub fn new(
        endpoint: PathBuf,
        queue: Arc<DropOldestQueue<Hit>>,
        failover_directory: PathBuf,
    ) -> Self {
        Self {
            endpoint,
            queue,
            failover_queue: Arc::new(DropOldestQueue::new(10_000)),
            failover: Arc::new(FailoverWriter::new(failover_directory)),
            state: AtomicU8::new(ConnState::Disconnected as u8),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, s: ConnState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    #[must_use]
    pub fn failover_queue_depth(&self) -> usize {
        self.failover_queue.len()
    }

    /// Runs until `shutdown_rx` reports true, at which point the writer
    /// stops accepting conceptual new enqueues (the caller is expected to
    /// have already stopped calling `HandoffChannel::enqueue`), drains
    /// what remains with a bounded deadline, and returns.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>, shutdown_timeout: Duration) {
        // Failover drain runs as its own task so disk writes never block
        // the primary stream writer.
        let failover_task = {
            let failover_queue = Arc::clone(&self.failover_queue);
            let failover = Arc::clone(&self.failover);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        hit = failover_queue.recv() => spill_one(&failover, &hit).await,
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                while let Some(hit) = failover_queue.try_recv() {
                                    spill_one(&failover, &hit).await;
                                }
                                break;
                            }
                        }
                    }
                }
            })
        };

        let mut stream: Option<UnixStream> = None;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let hit = tokio::select! {
                h = self.queue.recv() => h,
                _ = shutdown_rx.changed() => continue,
            };

            if stream.is_none() {
                self.set_state(ConnState::Connecting);
                match UnixStream::connect(&self.endpoint).await {
                    Ok(s) => {
                        info!(endpoint = %self.endpoint.display(), "handoff writer connected");
                        stream = Some(s);
                        self.set_state(ConnState::Connected);
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(e) => {
                        warn!(error = %e, "handoff connect failed, spilling to failover");
                        self.set_state(ConnState::Disconnected);
                        self.failover_queue.enqueue(hit);
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                }
            }

            if let Some(s) = stream.as_mut() {
                if write_hit_line(s, &hit).await.is_err() {
                    warn!("handoff stream write failed, disconnecting");
                    stream = None;
                    self.set_state(ConnState::Disconnected);
                    self.failover_queue.enqueue(hit);
                }
            }
        }

        self.set_state(ConnState::Draining);
        self.drain(stream, shutdown_timeout).await;
        let _ = failover_task.await;
    }

    async fn drain(&self, mut stream: Option<UnixStream>, deadline: Duration) {
        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut lost = 0u64;

        while let Some(hit) = self.queue.try_recv() {
            if tokio::time::Instant::now() >= deadline_at {
                lost += 1;
                continue;
            }
            match stream.as_mut() {
                Some(s) if write_hit_line(s, &hit).await.is_ok() => {}
                _ => {
                    self.failover_queue.enqueue(hit);
                }
            }
        }

        if lost > 0 {
            warn!(lost, "handoff writer shutdown deadline exceeded, items lost");
        }
    }

    /// Non-blocking enqueue onto the primary queue, called from the
    /// request path via `HandoffChannel`.
    pub fn enqueue(&self, hit: Hit) {
        self.queue.enqueue(hit);
    }

    #[must_use]
    pub fn primary_dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }
}

async fn write_hit_line(stream: &mut UnixStream, hit: &Hit) -> std::io::Result<()> {
    let line = serde_json::to_string(hit)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

async fn spill_one(failover: &FailoverWriter, hit: &Hit) {
    match serde_json::to_string(hit) {
        Ok(line) => {
            if let Err(e) = failover.write_line(&line).await {
                warn!(error = %e, "failover write failed");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize hit for failover"),
    }
}
