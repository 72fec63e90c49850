//! Dispatch stage: delivers each dispatch request to its subscriber.
//!
//! Every request gets exactly one POST attempt, run as its own task so a slow
//! subscriber never holds up the others. There are no retries: whatever the
//! outcome, it is logged and the request is finished. Deliveries are tracked
//! in a [`JoinSet`] so shutdown can wait for them.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::Result;
use crate::model::{DispatchRequest, Payload};
use crate::telemetry::metrics;

use super::PipelineStats;

/// Final outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed(FailureReason),
}

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No response within the configured timeout.
    Timeout,
    /// Connection refused, reset, DNS failure and the like.
    Network,
    /// The subscriber address could not be turned into a request.
    InvalidAddress,
    /// The subscriber answered with a non-2xx status.
    Status(u16),
    /// The payload could not be encoded.
    Encode,
}

impl FailureReason {
    fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::InvalidAddress => "invalid_address",
            Self::Status(_) => "status",
            Self::Encode => "encode",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Network => write!(f, "network error"),
            Self::InvalidAddress => write!(f, "invalid subscriber address"),
            Self::Status(code) => write!(f, "subscriber returned status {code}"),
            Self::Encode => write!(f, "payload encoding failed"),
        }
    }
}

/// HTTP client for subscriber deliveries.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hookline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// POST `{"payload": ...}` to `address`.
    pub async fn deliver(&self, address: &str, payload: &Payload) -> DeliveryOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to encode payload");
                return DeliveryOutcome::Failed(FailureReason::Encode);
            }
        };

        let response = self
            .client
            .post(address)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                // Read the body to the end so the connection goes back to the pool.
                if let Err(e) = resp.bytes().await {
                    debug!(error = %e, "failed to read subscriber response body");
                }
                if status.is_success() {
                    DeliveryOutcome::Delivered {
                        status: status.as_u16(),
                    }
                } else {
                    DeliveryOutcome::Failed(FailureReason::Status(status.as_u16()))
                }
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Failed(FailureReason::Timeout),
            Err(e) if e.is_builder() => {
                debug!(error = %e, "cannot build subscriber request");
                DeliveryOutcome::Failed(FailureReason::InvalidAddress)
            }
            Err(e) => {
                debug!(error = %e, "subscriber request failed");
                DeliveryOutcome::Failed(FailureReason::Network)
            }
        }
    }
}

/// Receive dispatch requests and spawn one delivery task per request.
///
/// At most `limit` deliveries run at once; when all permits are taken the loop
/// stops reading, which backs up into processing and then ingestion. Returns
/// after the channel closes and every spawned delivery has finished.
pub(crate) async fn dispatch_loop(
    mut rx: mpsc::Receiver<DispatchRequest>,
    client: DeliveryClient,
    limit: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
) {
    let mut deliveries = JoinSet::new();

    loop {
        tokio::select! {
            Some(done) = deliveries.join_next(), if !deliveries.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "delivery task ended abnormally");
                }
            }
            next = rx.recv() => {
                let Some(request) = next else { break };

                let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
                    warn!(id = %request.id(), "delivery limiter closed, dropping request");
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                };

                let client = client.clone();
                let stats = Arc::clone(&stats);
                let span = info_span!(
                    "dispatch",
                    "work.id" = %request.id(),
                    "work.subscriber" = request.subscriber_address(),
                );
                stats.in_flight.fetch_add(1, Ordering::Relaxed);

                deliveries.spawn(
                    async move {
                        let _permit = permit;
                        run_delivery(&client, request, &stats).await;
                        stats.in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                    .instrument(span),
                );
            }
        }
    }

    if !deliveries.is_empty() {
        info!(in_flight = deliveries.len(), "waiting for in-flight deliveries");
    }
    while let Some(done) = deliveries.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "delivery task ended abnormally");
        }
    }

    info!("dispatch stage stopped");
}

async fn run_delivery(client: &DeliveryClient, request: DispatchRequest, stats: &PipelineStats) {
    let started = Instant::now();
    let outcome = client
        .deliver(request.subscriber_address(), request.payload())
        .await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    metrics::dispatch_duration_ms().record(duration_ms, &[]);

    match outcome {
        DeliveryOutcome::Delivered { status } => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            metrics::dispatch_attempts().add(1, &[KeyValue::new("outcome", "delivered")]);
            info!(status, duration_ms, "payload delivered");
        }
        DeliveryOutcome::Failed(reason) => {
            stats.delivery_failed.fetch_add(1, Ordering::Relaxed);
            metrics::dispatch_attempts().add(1, &[KeyValue::new("outcome", reason.label())]);
            warn!(%reason, duration_ms, "delivery failed, discarding");
        }
    }
}
