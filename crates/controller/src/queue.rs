//! Bounded FIFO queues and the watering stop signal.
//!
//! `Queue` carries watering requests and telemetry events between tasks with
//! producer backpressure: a send on a full queue waits until the consumer
//! frees a slot. Unlike a plain channel it also supports `drain` from the
//! producer side, which the stop-all path needs so the queue is empty before
//! the in-flight pulse is interrupted.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, Semaphore};

/// Capacity of the watering and telemetry queues. Sized above any realistic
/// burst of user commands.
pub const QUEUE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Bounded FIFO
// ---------------------------------------------------------------------------

/// A bounded multi-producer FIFO shared by reference; elements move by value.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    /// Append `item`, waiting while the queue is full.
    pub async fn send(&self, mut item: T) {
        loop {
            let notified = self.inner.not_full.notified();
            tokio::pin!(notified);
            // Register for a wakeup before re-checking capacity, so a slot
            // freed between the check and the await is not missed.
            notified.as_mut().enable();

            match self.try_push(item).await {
                Ok(()) => {
                    self.inner.not_empty.notify_one();
                    return;
                }
                Err(rejected) => item = rejected,
            }

            notified.await;
        }
    }

    async fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.inner.items.lock().await;
        if items.len() < self.inner.capacity {
            items.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Remove and return the oldest element, waiting while the queue is empty.
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.inner.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.inner.items.lock().await.pop_front() {
                self.inner.not_full.notify_one();
                return item;
            }

            notified.await;
        }
    }

    /// Discard every queued element, waking any producers blocked on a full
    /// queue. Returns how many elements were dropped.
    pub async fn drain(&self) -> usize {
        let dropped = {
            let mut items = self.inner.items.lock().await;
            let n = items.len();
            items.clear();
            n
        };
        self.inner.not_full.notify_waiters();
        dropped
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.inner.items.lock().await.len()
    }

    #[allow(dead_code)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

/// One-bit interrupt for the watering worker's timed wait.
///
/// At most one signal is ever pending: raising an already-raised signal is a
/// no-op, and the worker clears stale signals before arming its wait so an
/// interrupt delivered while idle cannot cut the next pulse short.
pub struct StopSignal {
    sem: Semaphore,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            sem: Semaphore::new(0),
        }
    }

    /// Deliver the interrupt. Keeps at most one permit pending.
    pub fn raise(&self) {
        if self.sem.available_permits() == 0 {
            self.sem.add_permits(1);
        }
    }

    /// Discard any pending interrupt.
    pub fn clear(&self) {
        while let Ok(permit) = self.sem.try_acquire() {
            permit.forget();
        }
    }

    /// Wait until the interrupt is delivered (or consume one already pending).
    pub async fn wait(&self) {
        // The semaphore is never closed, so acquire cannot fail in practice.
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
