//! Ingestion: validates webhook registrations and enqueues them.

use std::sync::Arc;

use opentelemetry::KeyValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{HookRequest, PipelineState, WorkId, WorkItem};
use crate::pipeline::{PipelineHandle, PipelineStats};
use crate::queue::{EnqueueError, WorkQueue};
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::metrics;

/// Why a registration was not accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    /// Body did not parse or carried no address.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Shutdown has begun.
    #[error("service is shutting down")]
    Unavailable,
    /// The work queue is full and the overflow policy rejects.
    #[error("work queue is full")]
    QueueFull,
}

impl Rejection {
    fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Unavailable => "unavailable",
            Self::QueueFull => "full",
        }
    }
}

/// Producer-side entry into the pipeline, shared by all request handlers.
#[derive(Debug, Clone)]
pub struct Ingress {
    queue: Arc<WorkQueue>,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownCoordinator,
}

impl Ingress {
    pub fn new(pipeline: &PipelineHandle, shutdown: ShutdownCoordinator) -> Self {
        Self {
            queue: pipeline.queue(),
            stats: pipeline.stats(),
            shutdown,
        }
    }

    /// Parse a raw `/webhook` body and enqueue it.
    pub async fn submit_json(&self, body: &[u8]) -> Result<WorkId, Rejection> {
        match serde_json::from_slice::<HookRequest>(body) {
            Ok(request) => self.submit(request).await,
            Err(e) => self.reject(Rejection::Malformed(e.to_string())),
        }
    }

    /// Enqueue a registration without waiting for processing or dispatch.
    ///
    /// Waits only as long as the overflow policy makes it wait for queue space.
    pub async fn submit(&self, request: HookRequest) -> Result<WorkId, Rejection> {
        let address = request.address.trim();
        if address.is_empty() {
            return self.reject(Rejection::Malformed("address must not be empty".to_string()));
        }
        if self.shutdown.state() != PipelineState::Running {
            return self.reject(Rejection::Unavailable);
        }

        let item = WorkItem::new(address);
        let id = item.id;
        match self.queue.enqueue(item).await {
            Ok(()) => {
                self.stats.record_accepted();
                metrics::webhooks_received().add(1, &[KeyValue::new("result", "accepted")]);
                debug!(id = %id, address, "webhook accepted");
                Ok(id)
            }
            Err(EnqueueError::Closed(_)) => self.reject(Rejection::Unavailable),
            Err(EnqueueError::Full(_)) => self.reject(Rejection::QueueFull),
        }
    }

    fn reject(&self, rejection: Rejection) -> Result<WorkId, Rejection> {
        metrics::webhooks_received().add(1, &[KeyValue::new("result", rejection.label())]);
        warn!(reason = %rejection, "webhook rejected");
        Err(rejection)
    }
}
