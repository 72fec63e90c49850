//! # hookline
//!
//! Accepts webhook registrations over HTTP, queues them, computes a payload
//! for each one and delivers it to the registered subscriber.
//!
//! The pipeline is bounded end to end (work queue, dispatch channel, delivery
//! concurrency), so a slow subscriber or slow processing pushes back on
//! callers instead of growing memory. Shutdown stops intake first, then drains
//! what was already accepted.

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod telemetry;
