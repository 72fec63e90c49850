//! Metric instrument factories for hookline.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"hookline"` meter. Without an
//! OTLP endpoint the global provider is a no-op, so recording is always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for hookline instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("hookline")
}

/// Counter: `/webhook` requests.
/// Labels: `result` ("accepted" | "malformed" | "unavailable" | "full").
pub fn webhooks_received() -> Counter<u64> {
    meter()
        .u64_counter("hookline.webhooks.received")
        .with_description("Number of webhook registrations received")
        .build()
}

/// Counter: queue-level operations.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("hookline.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: work items that left the processing stage.
/// Labels: `result` ("ok" | "error").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("hookline.items.processed")
        .with_description("Number of work items processed")
        .build()
}

/// Counter: outbound delivery attempts.
/// Labels: `outcome` ("delivered" | "timeout" | "network" | "invalid_address" | "status" | "encode").
pub fn dispatch_attempts() -> Counter<u64> {
    meter()
        .u64_counter("hookline.dispatch.attempts")
        .with_description("Number of outbound delivery attempts")
        .build()
}

/// Histogram: outbound delivery duration in milliseconds.
pub fn dispatch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("hookline.dispatch.duration_ms")
        .with_description("Outbound delivery duration in milliseconds")
        .with_unit("ms")
        .build()
}
