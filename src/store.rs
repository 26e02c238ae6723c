//! Queue store port and the reference in-memory implementation (spec §4.5,
//! §6 "Ports consumed by the core").
//!
//! The concrete backing stores this core is meant to run against (an
//! external key-value service, etc.) are out of scope and described by
//! contract only; `MemoryQueueStore` here is the one reference
//! implementation specified for testability.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::Mutex;

use crate::frame::Frame;

/// Durable FIFO-per-destination store. Total enqueue order is preserved
/// except for requeues, which reinsert at the head (spec §3, §9 design
/// note: "a store whose primitives are rpush/lpop needs an extra left-push
/// to satisfy this").
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends `frame` to the tail of `destination`'s queue.
    async fn enqueue(&self, destination: &str, frame: Frame);

    /// Removes and returns the head of `destination`'s queue, or `None`.
    async fn dequeue(&self, destination: &str) -> Option<Frame>;

    /// Reinserts `frame` at the *head* of `destination`'s queue — used when
    /// a frame that was in flight to a subscriber must go back in line
    /// ahead of anything enqueued after it (spec §4.5, §5).
    async fn requeue(&self, destination: &str, frame: Frame);

    async fn size(&self, destination: &str) -> usize;

    async fn has_frames(&self, destination: &str) -> bool {
        self.size(destination).await > 0
    }

    async fn destinations(&self) -> Vec<String>;

    /// Cleanup hook for stores with external resources to release.
    async fn close(&self) {}
}

/// Drains `destination` by repeated `dequeue` until empty, as an async
/// stream. Ported from the original source's `AsyncQueueFrameIterator`
/// (SPEC_FULL.md §3) — a generic helper over any `QueueStore`, not an
/// auto-delivery mechanism on subscribe.
pub fn drain(store: Arc<dyn QueueStore>, destination: String) -> impl Stream<Item = Frame> {
    stream::unfold((store, destination), |(store, destination)| async move {
        let frame = store.dequeue(&destination).await?;
        Some((frame, (store, destination)))
    })
}

/// In-memory reference [`QueueStore`] implementation, suitable for testing
/// and single-process deployments (spec §4.5, "one reference in-memory
/// implementation is specified for testability").
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<Frame>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        MemoryQueueStore {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, destination: &str, frame: Frame) {
        let mut queues = self.queues.lock().await;
        queues.entry(destination.to_string()).or_default().push_back(frame);
    }

    async fn dequeue(&self, destination: &str) -> Option<Frame> {
        let mut queues = self.queues.lock().await;
        queues.get_mut(destination).and_then(|q| q.pop_front())
    }

    async fn requeue(&self, destination: &str, frame: Frame) {
        let mut queues = self.queues.lock().await;
        queues.entry(destination.to_string()).or_default().push_front(frame);
    }

    async fn size(&self, destination: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(destination).map(|q| q.len()).unwrap_or(0)
    }

    async fn destinations(&self) -> Vec<String> {
        let queues = self.queues.lock().await;
        queues.keys().cloned().collect()
    }
}
