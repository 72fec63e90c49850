//! Processing stage: turns each work item into a dispatch request.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, debug, info, warn};

use crate::error::Result;
use crate::model::{DispatchRequest, Payload, WorkItem};
use crate::queue::WorkReceiver;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_stage_transition, start_item_span};

use super::PipelineStats;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The computation applied to every work item.
///
/// Implementations may take arbitrarily long; they run on the processing
/// workers and never on the ingestion path. An error drops the item.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, item: &WorkItem) -> impl Future<Output = Result<Payload>> + Send;
}

/// Stand-in for heavy computation: waits, then returns random letters.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    delay: Duration,
    payload_len: usize,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration, payload_len: usize) -> Self {
        Self { delay, payload_len }
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }
}

impl Processor for SimulatedProcessor {
    async fn process(&self, _item: &WorkItem) -> Result<Payload> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Payload::new(random_letters(self.payload_len)))
    }
}

fn random_letters(len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| LETTERS[fastrand::usize(..LETTERS.len())])
        .collect()
}

/// One processing worker. Exits once the work queue is closed and drained.
///
/// Workers share the receiver; with a single worker, items are processed in
/// queue order.
pub(crate) async fn processing_loop<P: Processor>(
    worker: usize,
    rx: Arc<Mutex<WorkReceiver>>,
    processor: Arc<P>,
    out: mpsc::Sender<DispatchRequest>,
    stats: Arc<PipelineStats>,
) {
    debug!(worker, "processing worker started");

    loop {
        let item = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(item) = item else { break };

        stats.dequeued.fetch_add(1, Ordering::Relaxed);
        let span = start_item_span(item.id, &item.subscriber_address);

        async {
            record_stage_transition(&span, "queued", "processing");
            let queued_ms = item.age_ms();

            match processor.process(&item).await {
                Ok(payload) => {
                    stats.processed.fetch_add(1, Ordering::Relaxed);
                    metrics::items_processed().add(1, &[KeyValue::new("result", "ok")]);
                    debug!(queued_ms, payload_len = payload.len(), "item processed");

                    let request = item.into_dispatch(payload);
                    record_stage_transition(&span, "processing", "dispatch_queued");
                    if let Err(mpsc::error::SendError(request)) = out.send(request).await {
                        stats.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(id = %request.id(), "dispatch stage is gone, dropping processed item");
                    }
                }
                Err(e) => {
                    stats.processing_failed.fetch_add(1, Ordering::Relaxed);
                    metrics::items_processed().add(1, &[KeyValue::new("result", "error")]);
                    warn!(error = %e, "processing failed, dropping item");
                }
            }
        }
        .instrument(span.clone())
        .await;
    }

    info!(worker, "processing worker stopped, work queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_payload_has_configured_length_and_alphabet() {
        let processor = SimulatedProcessor::new(Duration::ZERO, 100);
        let payload = processor
            .process(&WorkItem::new("http://sub"))
            .await
            .unwrap();

        assert_eq!(payload.len(), 100);
        assert!(payload.bytes.iter().all(|b| b.is_ascii_alphabetic()));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_processor_waits_for_its_delay() {
        let processor = SimulatedProcessor::new(Duration::from_secs(5), 4);
        let started = tokio::time::Instant::now();
        processor.process(&WorkItem::new("http://sub")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn zero_length_payload_is_empty() {
        assert!(random_letters(0).is_empty());
    }
}
