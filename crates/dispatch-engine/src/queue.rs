//! FIFO target queue shared by an agent's worker pool
//!
//! Producers never block; consumers block only while the queue is empty and
//! open. The queue lock is scoped to push/pop bookkeeping and is never held
//! across a payload iteration.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use swarm_core::{DispatchId, Payload, Result, SwarmError, Target};
use tokio::sync::Notify;

/// A target accepted onto an agent's queue, with its payload already
/// resolved so workers never consult the registry.
pub struct QueuedTarget {
    pub id: DispatchId,
    pub target: Target,
    pub payload: Arc<dyn Payload>,
}

impl std::fmt::Debug for QueuedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTarget")
            .field("id", &self.id)
            .field("address", &self.target.address)
            .field("payload_id", &self.target.payload_id)
            .finish()
    }
}

#[derive(Default)]
struct QueueInner {
    items: VecDeque<QueuedTarget>,
    closed: bool,
}

/// Multi-producer, multi-consumer FIFO queue with close semantics.
#[derive(Default)]
pub struct TargetQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl std::fmt::Debug for TargetQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TargetQueue")
            .field("len", &inner.items.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl TargetQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue at the tail. Fails once the queue has been closed.
    pub fn push(&self, item: QueuedTarget) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(SwarmError::rejected("enqueue", "closed queue"));
            }
            inner.items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Await the head target. Returns `None` once the queue is closed and
    /// drained; a woken consumer always re-checks before sleeping again.
    pub async fn pop(&self) -> Option<QueuedTarget> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Discard every queued-but-not-started target, returning how many were
    /// removed. In-flight targets are untouched.
    pub fn clear_pending(&self) -> usize {
        let mut inner = self.inner.lock();
        let cleared = inner.items.len();
        inner.items.clear();
        cleared
    }

    /// Close the queue: pending pushes fail, consumers drain what is left
    /// and then observe end-of-queue.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}
