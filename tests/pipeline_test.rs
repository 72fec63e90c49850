//! Integration tests for the processing and dispatch pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use hookline::error::{Error, Result};
use hookline::ingest::{Ingress, Rejection};
use hookline::model::{HookRequest, Payload, WorkItem};
use hookline::pipeline::processing::{Processor, SimulatedProcessor};
use hookline::pipeline::{Pipeline, PipelineConfig, PipelineHandle};
use hookline::queue::OverflowPolicy;
use hookline::shutdown::ShutdownCoordinator;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DRAIN: Duration = Duration::from_secs(5);

fn instant() -> SimulatedProcessor {
    SimulatedProcessor::new(Duration::ZERO, 100)
}

async fn subscriber(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscriber"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn ingress(pipeline: &PipelineHandle) -> Ingress {
    Ingress::new(pipeline, ShutdownCoordinator::new())
}

async fn submit(ingress: &Ingress, address: impl Into<String>) {
    ingress
        .submit(HookRequest {
            address: address.into(),
        })
        .await
        .expect("submission should be accepted");
}

/// Records the order in which items reach processing.
#[derive(Clone, Default)]
struct Recording {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Processor for Recording {
    async fn process(&self, item: &WorkItem) -> Result<Payload> {
        self.seen
            .lock()
            .unwrap()
            .push(item.subscriber_address.clone());
        Ok(Payload::new(b"recorded".to_vec()))
    }
}

/// Fails for any address containing "fail".
struct Picky;

impl Processor for Picky {
    async fn process(&self, item: &WorkItem) -> Result<Payload> {
        if item.subscriber_address.contains("fail") {
            Err(Error::Processing("refusing this one".to_string()))
        } else {
            Ok(Payload::new(b"ok".to_vec()))
        }
    }
}

/// Holds every item until a permit is released.
struct Gated {
    gate: Arc<Semaphore>,
}

impl Processor for Gated {
    async fn process(&self, _item: &WorkItem) -> Result<Payload> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Processing(e.to_string()))?;
        permit.forget();
        Ok(Payload::new(b"gated".to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn each_submission_yields_exactly_one_delivery() {
    let server = subscriber(200).await;
    let pipeline = Pipeline::start(PipelineConfig::default(), instant()).unwrap();
    let ingress = ingress(&pipeline);

    for _ in 0..5 {
        submit(&ingress, format!("{}/subscriber", server.uri())).await;
    }

    let report = pipeline.drain(DRAIN).await;
    assert!(report.completed);
    assert_eq!(report.stats.accepted, 5);
    assert_eq!(report.stats.delivered, 5);
    assert_eq!(report.stats.dispatch_attempts(), 5);
    assert_eq!(report.stats.unfinished(), 0);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);
}

#[tokio::test]
async fn delivered_body_carries_payload_of_configured_length() {
    let server = subscriber(200).await;
    let pipeline = Pipeline::start(
        PipelineConfig::default(),
        SimulatedProcessor::new(Duration::from_millis(20), 100),
    )
    .unwrap();
    let ingress = ingress(&pipeline);

    submit(&ingress, format!("{}/subscriber", server.uri())).await;
    pipeline.drain(DRAIN).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(
        request.headers.get("content-type").unwrap(),
        "application/json"
    );
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    let encoded = body["payload"].as_str().expect("payload should be a string");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    assert_eq!(bytes.len(), 100);
    assert!(bytes.iter().all(u8::is_ascii_alphabetic));
}

#[tokio::test]
async fn single_worker_processes_in_submission_order() {
    let server = subscriber(200).await;
    let recording = Recording::default();
    let pipeline = Pipeline::start(PipelineConfig::default(), recording.clone()).unwrap();
    let ingress = ingress(&pipeline);

    let addresses: Vec<String> = (0..10)
        .map(|n| format!("{}/subscriber?n={n}", server.uri()))
        .collect();
    for address in &addresses {
        submit(&ingress, address.clone()).await;
    }

    pipeline.drain(DRAIN).await;
    assert_eq!(*recording.seen.lock().unwrap(), addresses);
}

#[tokio::test]
async fn worker_pool_delivers_everything_once() {
    let server = subscriber(200).await;
    let config = PipelineConfig {
        processing_workers: 4,
        ..Default::default()
    };
    let pipeline = Pipeline::start(config, instant()).unwrap();
    let ingress = ingress(&pipeline);

    for _ in 0..20 {
        submit(&ingress, format!("{}/subscriber", server.uri())).await;
    }

    let report = pipeline.drain(DRAIN).await;
    assert_eq!(report.stats.processed, 20);
    assert_eq!(report.stats.delivered, 20);
    assert_eq!(server.received_requests().await.unwrap().len(), 20);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processing_failure_drops_item_and_keeps_going() {
    let server = subscriber(200).await;
    let pipeline = Pipeline::start(PipelineConfig::default(), Picky).unwrap();
    let ingress = ingress(&pipeline);

    submit(&ingress, format!("{}/subscriber", server.uri())).await;
    submit(&ingress, format!("{}/subscriber?fail", server.uri())).await;
    submit(&ingress, format!("{}/subscriber", server.uri())).await;

    let report = pipeline.drain(DRAIN).await;
    assert_eq!(report.stats.processing_failed, 1);
    assert_eq!(report.stats.delivered, 2);
    assert_eq!(report.stats.unfinished(), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn non_success_status_is_a_failed_delivery() {
    let server = subscriber(500).await;
    let pipeline = Pipeline::start(PipelineConfig::default(), instant()).unwrap();
    let ingress = ingress(&pipeline);

    submit(&ingress, format!("{}/subscriber", server.uri())).await;

    let report = pipeline.drain(DRAIN).await;
    assert_eq!(report.stats.delivered, 0);
    assert_eq!(report.stats.delivery_failed, 1);
    // No retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_subscriber_does_not_block_others() {
    let server = subscriber(200).await;
    let pipeline = Pipeline::start(PipelineConfig::default(), instant()).unwrap();
    let ingress = ingress(&pipeline);

    submit(&ingress, "http://127.0.0.1:9/subscriber").await;
    submit(&ingress, "not a url").await;
    submit(&ingress, format!("{}/subscriber", server.uri())).await;

    let report = pipeline.drain(DRAIN).await;
    assert!(report.completed);
    assert_eq!(report.stats.delivered, 1);
    assert_eq!(report.stats.delivery_failed, 2);
}

// ---------------------------------------------------------------------------
// Backpressure & drain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_queue_rejects_under_reject_policy() {
    let gate = Arc::new(Semaphore::new(0));
    let config = PipelineConfig {
        queue_capacity: 1,
        overflow_policy: OverflowPolicy::Reject,
        ..Default::default()
    };
    let pipeline = Pipeline::start(
        config,
        Gated {
            gate: Arc::clone(&gate),
        },
    )
    .unwrap();
    let ingress = ingress(&pipeline);
    let stats = pipeline.stats();

    // First item is taken by the worker and parks on the gate.
    submit(&ingress, "http://127.0.0.1:9/a").await;
    while stats.snapshot().dequeued < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Second fills the only slot; third bounces.
    submit(&ingress, "http://127.0.0.1:9/b").await;
    let rejected = ingress
        .submit(HookRequest {
            address: "http://127.0.0.1:9/c".to_string(),
        })
        .await;
    assert_eq!(rejected, Err(Rejection::QueueFull));
    assert_eq!(pipeline.queue().len().await, 1);

    gate.add_permits(2);
    let report = pipeline.drain(DRAIN).await;
    assert_eq!(report.stats.accepted, 2);
    assert_eq!(report.stats.processed, 2);
}

#[tokio::test]
async fn drain_processes_items_queued_before_close() {
    let server = subscriber(200).await;
    let pipeline = Pipeline::start(
        PipelineConfig::default(),
        SimulatedProcessor::new(Duration::from_millis(30), 10),
    )
    .unwrap();
    let ingress = ingress(&pipeline);
    let queue = pipeline.queue();

    for _ in 0..3 {
        submit(&ingress, format!("{}/subscriber", server.uri())).await;
    }

    let report = pipeline.drain(DRAIN).await;
    assert!(report.completed);
    assert_eq!(report.stats.delivered, 3);

    let late = queue.enqueue(WorkItem::new("http://late")).await;
    assert!(late.is_err(), "closed queue must refuse new items");
}

#[tokio::test]
async fn drain_gives_up_after_timeout() {
    let gate = Arc::new(Semaphore::new(0));
    let pipeline = Pipeline::start(PipelineConfig::default(), Gated { gate }).unwrap();
    let ingress = ingress(&pipeline);

    submit(&ingress, "http://127.0.0.1:9/stuck").await;
    submit(&ingress, "http://127.0.0.1:9/stuck").await;

    let report = pipeline.drain(Duration::from_millis(100)).await;
    assert!(!report.completed);
    assert_eq!(report.stats.unfinished(), 2);
}
