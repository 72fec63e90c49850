//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup and fails fast on malformed values. Precedence, lowest
//! first: built-in defaults, TOML file, environment. CLI flags are applied on
//! top by the binary.

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::pipeline::PipelineConfig;
use crate::pipeline::processing::SimulatedProcessor;
use crate::queue::OverflowPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub processing_workers: usize,
    pub processing_delay: Duration,
    pub payload_len: usize,
    pub dispatch_timeout: Duration,
    pub dispatch_max_in_flight: usize,
    /// How long the HTTP listener gets to finish in-flight requests.
    pub shutdown_grace: Duration,
    /// Bound on draining queued and in-flight work after the listener stops.
    pub drain_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            queue_capacity: 100,
            dispatch_queue_capacity: 100,
            overflow_policy: OverflowPolicy::Block,
            processing_workers: 1,
            processing_delay: Duration::from_secs(5),
            payload_len: 100,
            dispatch_timeout: Duration::from_secs(10),
            dispatch_max_in_flight: 64,
            shutdown_grace: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(30),
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

/// TOML shape. Every field is optional and overrides the default when set.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen_addr: Option<SocketAddr>,
    queue_capacity: Option<usize>,
    dispatch_queue_capacity: Option<usize>,
    overflow_policy: Option<OverflowPolicy>,
    processing_workers: Option<usize>,
    processing_delay_ms: Option<u64>,
    payload_len: Option<usize>,
    dispatch_timeout_ms: Option<u64>,
    dispatch_max_in_flight: Option<usize>,
    shutdown_grace_secs: Option<u64>,
    drain_timeout_secs: Option<u64>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))?;

        Self::default()
            .with_file(file)
            .with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// `lookup` returns the raw value for a variable name, or `None` when unset.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = parsed(&lookup, "LISTEN_ADDR")? {
            self.listen_addr = v;
        }
        if let Some(v) = parsed(&lookup, "QUEUE_CAPACITY")? {
            self.queue_capacity = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_QUEUE_CAPACITY")? {
            self.dispatch_queue_capacity = v;
        }
        if let Some(v) = parsed(&lookup, "OVERFLOW_POLICY")? {
            self.overflow_policy = v;
        }
        if let Some(v) = parsed(&lookup, "PROCESSING_WORKERS")? {
            self.processing_workers = v;
        }
        if let Some(v) = parsed(&lookup, "PROCESSING_DELAY_MS")? {
            self.processing_delay = Duration::from_millis(v);
        }
        if let Some(v) = parsed(&lookup, "PAYLOAD_LEN")? {
            self.payload_len = v;
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_TIMEOUT_MS")? {
            self.dispatch_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parsed(&lookup, "DISPATCH_MAX_IN_FLIGHT")? {
            self.dispatch_max_in_flight = v;
        }
        if let Some(v) = parsed(&lookup, "SHUTDOWN_GRACE_SECS")? {
            self.shutdown_grace = Duration::from_secs(v);
        }
        if let Some(v) = parsed(&lookup, "DRAIN_TIMEOUT_SECS")? {
            self.drain_timeout = Duration::from_secs(v);
        }
        if let Some(v) = lookup("OTEL_ENDPOINT").filter(|v| !v.is_empty()) {
            self.otel_endpoint = Some(v);
        }
        if let Some(v) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = v;
        }

        self.validate()?;
        Ok(self)
    }

    fn with_file(mut self, file: FileConfig) -> Self {
        let FileConfig {
            listen_addr,
            queue_capacity,
            dispatch_queue_capacity,
            overflow_policy,
            processing_workers,
            processing_delay_ms,
            payload_len,
            dispatch_timeout_ms,
            dispatch_max_in_flight,
            shutdown_grace_secs,
            drain_timeout_secs,
            otel_endpoint,
            log_level,
        } = file;

        self.listen_addr = listen_addr.unwrap_or(self.listen_addr);
        self.queue_capacity = queue_capacity.unwrap_or(self.queue_capacity);
        self.dispatch_queue_capacity =
            dispatch_queue_capacity.unwrap_or(self.dispatch_queue_capacity);
        self.overflow_policy = overflow_policy.unwrap_or(self.overflow_policy);
        self.processing_workers = processing_workers.unwrap_or(self.processing_workers);
        if let Some(ms) = processing_delay_ms {
            self.processing_delay = Duration::from_millis(ms);
        }
        self.payload_len = payload_len.unwrap_or(self.payload_len);
        if let Some(ms) = dispatch_timeout_ms {
            self.dispatch_timeout = Duration::from_millis(ms);
        }
        self.dispatch_max_in_flight = dispatch_max_in_flight.unwrap_or(self.dispatch_max_in_flight);
        if let Some(secs) = shutdown_grace_secs {
            self.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = drain_timeout_secs {
            self.drain_timeout = Duration::from_secs(secs);
        }
        if otel_endpoint.is_some() {
            self.otel_endpoint = otel_endpoint;
        }
        self.log_level = log_level.unwrap_or(self.log_level);
        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("queue_capacity", self.queue_capacity),
            ("dispatch_queue_capacity", self.dispatch_queue_capacity),
            ("processing_workers", self.processing_workers),
            ("dispatch_max_in_flight", self.dispatch_max_in_flight),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.dispatch_max_in_flight > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "dispatch_max_in_flight must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.dispatch_timeout.is_zero() {
            return Err(Error::Config(
                "dispatch_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            dispatch_queue_capacity: self.dispatch_queue_capacity,
            overflow_policy: self.overflow_policy,
            processing_workers: self.processing_workers,
            dispatch_timeout: self.dispatch_timeout,
            dispatch_max_in_flight: self.dispatch_max_in_flight,
        }
    }

    pub fn processor(&self) -> SimulatedProcessor {
        SimulatedProcessor::new(self.processing_delay, self.payload_len)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        _ => Ok(None),
    }
}
