//! Bounded drop-oldest queue.
//!
//! Spec §9 sanctions a ring buffer under a single lock as an acceptable
//! emulation of a lock-free bounded queue when the hot-path requirement
//! — non-blocking enqueue — is preserved. The critical section here is a
//! handful of pointer moves; it never awaits and never performs I/O.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue. At capacity, drops the oldest element and
    /// increments the drop counter.
    pub fn enqueue(&self, item: T) {
        {
            let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if guard.len() >= self.capacity {
                guard.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            guard.push_back(item);
        }
        self.notify.notify_one();
    }

    /// Await the next item, without busy-polling.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(item) = self.try_recv() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Pop one item if present, without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_below_capacity_never_drops() {
        let q: DropOldestQueue<u32> = DropOldestQueue::new(3);
        q.enqueue(1);
        q.enqueue(2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped_count(), 0);
    }

    #[test]
    fn enqueue_at_capacity_drops_oldest() {
        let q: DropOldestQueue<u32> = DropOldestQueue::new(3);
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        q.enqueue(4);
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.try_recv(), Some(2));
    }

    #[tokio::test]
    async fn recv_returns_items_in_fifo_order() {
        let q: DropOldestQueue<u32> = DropOldestQueue::new(10);
        q.enqueue(1);
        q.enqueue(2);
        assert_eq!(q.recv().await, 1);
        assert_eq!(q.recv().await, 2);
    }
}
