//! Bounded message queue with non-blocking producers.
//!
//! Both hub queues (`host_outbound`, `peripheral_outbound`) need three
//! things a plain channel does not give together: a producer that never
//! blocks (overflow drops the new message), a consumer that awaits, and
//! the ability to drain the queue from a task that is neither. Sync
//! requests drain `host_outbound` before waiting, and resets flush
//! `peripheral_outbound`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Bounded FIFO shared between producers, one consumer, and drainers.
///
/// When the queue is full, [`BoundedQueue::try_push`] hands the message
/// back instead of blocking; the caller decides how to log the drop.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be > 0");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Enqueue `item`, or return it when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        {
            let mut q = self.inner.lock().unwrap();
            if q.len() >= self.capacity {
                return Err(item);
            }
            q.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Await the next item. Intended for a single consumer task.
    pub async fn recv(&self) -> T {
        loop {
            // Register for a wakeup before checking, so a push between the
            // check and the await still lands.
            let notified = self.notify.notified();
            if let Some(item) = self.inner.lock().unwrap().pop_front() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove every queued item, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut q = self.inner.lock().unwrap();
        let n = q.len();
        q.clear();
        n
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
