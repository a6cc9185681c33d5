//! Multi-producer/multi-consumer FIFO channel used between pipeline stages.
//!
//! Cheap to clone; every clone is a handle onto the same queue. Receives
//! come in non-blocking, blocking, and blocking-with-timeout flavors so
//! every loop that must observe a shutdown signal can bound its wait.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::Notify;

pub struct MessageQueue<T> {
    inner: Arc<Shared<T>>,
}

struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item is pushed.
    readable: Notify,
    /// Signalled when a slot frees up on a bounded queue.
    writable: Notify,
    capacity: Option<usize>,
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> MessageQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                readable: Notify::new(),
                writable: Notify::new(),
                capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pop the oldest item without waiting.
    pub fn try_recv(&self) -> Option<T> {
        let popped = self.lock().pop_front();
        if popped.is_some() {
            self.inner.writable.notify_one();
        }
        popped
    }

    /// Push without waiting; hands the item back when the queue is full.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        {
            let mut items = self.lock();
            if self.inner.capacity.is_some_and(|cap| items.len() >= cap) {
                return Err(value);
            }
            items.push_back(value);
        }
        self.inner.readable.notify_one();
        Ok(())
    }

    /// Put an item at the head of the queue, ahead of everything pending.
    /// Used to replay persisted work; ignores the capacity bound so replay
    /// can never deadlock against a full queue.
    pub fn push_front(&self, value: T) {
        self.lock().push_front(value);
        self.inner.readable.notify_one();
    }

    /// Pop the oldest item, waiting for one to arrive.
    pub async fn recv(&self) -> T {
        loop {
            let readable = self.inner.readable.notified();
            if let Some(value) = self.try_recv() {
                return value;
            }
            readable.await;
        }
    }

    /// Pop the oldest item, waiting up to `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let readable = self.inner.readable.notified();
            if let Some(value) = self.try_recv() {
                return Some(value);
            }
            if tokio::time::timeout_at(deadline, readable).await.is_err() {
                return None;
            }
        }
    }

    /// Push an item, waiting for room on a bounded queue.
    pub async fn send(&self, value: T) {
        let mut value = value;
        loop {
            let writable = self.inner.writable.notified();
            match self.try_send(value) {
                Ok(()) => return,
                Err(back) => value = back,
            }
            writable.await;
        }
    }

    /// Push an item, waiting up to `timeout` for room; hands the item back
    /// when the queue stays full.
    pub async fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), T> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut value = value;
        loop {
            let writable = self.inner.writable.notified();
            match self.try_send(value) {
                Ok(()) => return Ok(()),
                Err(back) => value = back,
            }
            if tokio::time::timeout_at(deadline, writable).await.is_err() {
                return Err(value);
            }
        }
    }

    /// Pop everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = self.lock().drain(..).collect();
        if !drained.is_empty() {
            self.inner.writable.notify_one();
        }
        drained
    }
}
