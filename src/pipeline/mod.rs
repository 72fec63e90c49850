//! The asynchronous pipeline: work queue → processing → dispatch.
//!
//! Stages share nothing but bounded channels. Closing the work queue is the
//! only stop signal: processing workers finish what is buffered and exit,
//! dropping their side of the dispatch channel, which in turn lets the
//! dispatch stage finish its in-flight deliveries and exit.

pub mod dispatch;
pub mod processing;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::queue::{OverflowPolicy, WorkQueue, work_queue};

use dispatch::{DeliveryClient, dispatch_loop};
use processing::{Processor, processing_loop};

/// Sizing and behaviour of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Workers draining the work queue. One keeps hand-off in FIFO order.
    pub processing_workers: usize,
    pub dispatch_timeout: Duration,
    pub dispatch_max_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            dispatch_queue_capacity: 100,
            overflow_policy: OverflowPolicy::Block,
            processing_workers: 1,
            dispatch_timeout: Duration::from_secs(10),
            dispatch_max_in_flight: 64,
        }
    }
}

/// Counters updated by every stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) dequeued: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) processing_failed: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) delivery_failed: AtomicU64,
    pub(crate) in_flight: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Items accepted by ingestion.
    pub accepted: u64,
    /// Items taken off the work queue by processing.
    pub dequeued: u64,
    pub processed: u64,
    pub processing_failed: u64,
    /// Processed items that never reached a delivery attempt.
    pub dropped: u64,
    pub delivered: u64,
    pub delivery_failed: u64,
    /// Deliveries started but not finished.
    pub in_flight: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            processing_failed: self.processing_failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failed: self.delivery_failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }
}

impl StatsSnapshot {
    /// Delivery attempts made, successful or not.
    pub fn dispatch_attempts(&self) -> u64 {
        self.delivered + self.delivery_failed
    }

    /// Accepted items with no recorded end: still queued, being processed,
    /// waiting for dispatch or mid-delivery.
    pub fn unfinished(&self) -> u64 {
        self.accepted.saturating_sub(
            self.processing_failed + self.dropped + self.delivered + self.delivery_failed,
        )
    }
}

/// Result of [`PipelineHandle::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Whether every stage finished before the deadline.
    pub completed: bool,
    pub stats: StatsSnapshot,
}

/// Entry point for starting the pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Spawn the processing workers and the dispatch stage.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<P: Processor>(config: PipelineConfig, processor: P) -> Result<PipelineHandle> {
        let client = DeliveryClient::new(config.dispatch_timeout)?;
        Ok(Self::start_with_client(config, processor, client))
    }

    pub fn start_with_client<P: Processor>(
        config: PipelineConfig,
        processor: P,
        client: DeliveryClient,
    ) -> PipelineHandle {
        let (queue, rx) = work_queue(config.queue_capacity, config.overflow_policy);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_capacity);
        let stats = Arc::new(PipelineStats::default());

        let rx = Arc::new(Mutex::new(rx));
        let processor = Arc::new(processor);
        let workers = (0..config.processing_workers.max(1))
            .map(|worker| {
                tokio::spawn(processing_loop(
                    worker,
                    Arc::clone(&rx),
                    Arc::clone(&processor),
                    dispatch_tx.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect();
        // Only the workers hold senders; dispatch ends when the last one exits.
        drop(dispatch_tx);

        let dispatcher = tokio::spawn(dispatch_loop(
            dispatch_rx,
            client,
            Arc::new(Semaphore::new(config.dispatch_max_in_flight.max(1))),
            Arc::clone(&stats),
        ));

        info!(
            queue_capacity = config.queue_capacity,
            overflow_policy = %config.overflow_policy,
            processing_workers = config.processing_workers,
            dispatch_max_in_flight = config.dispatch_max_in_flight,
            "pipeline started"
        );

        PipelineHandle {
            queue: Arc::new(queue),
            stats,
            workers,
            dispatcher,
        }
    }
}

/// Owner of a running pipeline.
pub struct PipelineHandle {
    queue: Arc<WorkQueue>,
    stats: Arc<PipelineStats>,
    workers: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
}

impl PipelineHandle {
    /// Producer handle for ingestion.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Close the work queue and wait, at most `timeout`, for everything already
    /// accepted to be processed and delivered.
    ///
    /// On timeout, remaining stages are aborted and whatever was still queued
    /// or in flight shows up in [`StatsSnapshot::unfinished`].
    pub async fn drain(self, timeout: Duration) -> DrainReport {
        let Self {
            queue,
            stats,
            mut workers,
            mut dispatcher,
        } = self;

        queue.close().await;
        info!(
            unfinished = stats.snapshot().unfinished(),
            "work queue closed, draining pipeline"
        );

        let finished = tokio::time::timeout(timeout, async {
            for worker in workers.iter_mut() {
                if let Err(e) = worker.await {
                    error!(error = %e, "processing worker panicked");
                }
            }
            if let Err(e) = (&mut dispatcher).await {
                error!(error = %e, "dispatch stage panicked");
            }
        })
        .await
        .is_ok();

        if !finished {
            for worker in &workers {
                worker.abort();
            }
            dispatcher.abort();
        }

        let report = DrainReport {
            completed: finished,
            stats: stats.snapshot(),
        };
        if finished {
            info!(
                delivered = report.stats.delivered,
                delivery_failed = report.stats.delivery_failed,
                processing_failed = report.stats.processing_failed,
                "pipeline drained"
            );
        } else {
            warn!(
                unfinished = report.stats.unfinished(),
                timeout_secs = timeout.as_secs_f64(),
                "pipeline drain timed out, abandoning remaining work"
            );
        }
        report
    }
}
