//! Bounded work queue between ingestion and processing.
//!
//! Producers share a [`WorkQueue`]; the processing stage owns the matching
//! [`WorkReceiver`]. Closing the queue only stops new enqueues: items already
//! buffered stay readable until the receiver has drained them, after which
//! `recv` returns `None`.

use std::str::FromStr;

use opentelemetry::KeyValue;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::model::WorkItem;
use crate::telemetry::metrics;

/// What a producer observes when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait until the consumer frees a slot.
    Block,
    /// Fail immediately with [`EnqueueError::Full`].
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown overflow policy '{other}' (expected block or reject)")),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => f.write_str("block"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Why an item was not enqueued. The item is handed back to the caller.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("work queue is closed")]
    Closed(WorkItem),
    #[error("work queue is full")]
    Full(WorkItem),
}

impl EnqueueError {
    pub fn into_item(self) -> WorkItem {
        match self {
            Self::Closed(item) | Self::Full(item) => item,
        }
    }
}

/// Producer side of the work queue.
#[derive(Debug)]
pub struct WorkQueue {
    tx: RwLock<Option<mpsc::Sender<WorkItem>>>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Consumer side of the work queue.
#[derive(Debug)]
pub struct WorkReceiver {
    rx: mpsc::Receiver<WorkItem>,
}

/// Create a work queue holding at most `capacity` items.
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rejects that first.
pub fn work_queue(capacity: usize, policy: OverflowPolicy) -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        WorkQueue {
            tx: RwLock::new(Some(tx)),
            capacity,
            policy,
        },
        WorkReceiver { rx },
    )
}

impl WorkQueue {
    /// Enqueue an item according to the overflow policy.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for a free slot. A producer
    /// that was already waiting when the queue closed still lands its item,
    /// since the consumer keeps draining until every producer is gone.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        let Some(tx) = self.tx.read().await.clone() else {
            record("rejected_closed");
            return Err(EnqueueError::Closed(item));
        };

        let result = match self.policy {
            OverflowPolicy::Block => tx
                .send(item)
                .await
                .map_err(|mpsc::error::SendError(item)| EnqueueError::Closed(item)),
            OverflowPolicy::Reject => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(item) => EnqueueError::Full(item),
                mpsc::error::TrySendError::Closed(item) => EnqueueError::Closed(item),
            }),
        };

        match &result {
            Ok(()) => record("enqueue"),
            Err(EnqueueError::Full(_)) => record("rejected_full"),
            Err(EnqueueError::Closed(_)) => record("rejected_closed"),
        }
        result
    }

    /// Stop accepting items. Idempotent.
    pub async fn close(&self) {
        if self.tx.write().await.take().is_some() {
            record("close");
            debug!("work queue closed");
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.tx.read().await.is_none()
    }

    /// Number of items currently buffered, or 0 once closed.
    pub async fn len(&self) -> usize {
        match self.tx.read().await.as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

impl WorkReceiver {
    /// Next item in FIFO order; `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }

    /// Number of items buffered but not yet received.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

fn record(operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", "work"),
            KeyValue::new("operation", operation),
        ],
    );
}
