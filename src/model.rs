//! Core data model.
//!
//! A work item is an accepted webhook registration. Processing turns it into a
//! dispatch request: the item's subscriber address paired with the payload
//! computed for it. Each value moves through the pipeline by ownership, so an
//! item is consumed exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// An accepted webhook registration awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Unique identifier, used to correlate logs across stages.
    pub id: WorkId,

    /// Where the computed payload will be delivered.
    pub subscriber_address: String,

    pub accepted_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(subscriber_address: impl Into<String>) -> Self {
        Self {
            id: WorkId::new(),
            subscriber_address: subscriber_address.into(),
            accepted_at: Utc::now(),
        }
    }

    /// Milliseconds since the item was accepted.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.accepted_at).num_milliseconds()
    }

    /// Pair this item's routing with its computed payload.
    ///
    /// Consumes the item: a dispatch request can only be born from a work item
    /// that has been through processing.
    pub(crate) fn into_dispatch(self, payload: Payload) -> DispatchRequest {
        DispatchRequest {
            id: self.id,
            subscriber_address: self.subscriber_address,
            payload,
        }
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Payload & Dispatch
// ---------------------------------------------------------------------------

/// Byte content produced by processing, delivered to the subscriber.
///
/// On the wire this is the body `{"payload": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "payload", with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A work item's routing address paired with its computed payload.
///
/// Constructed only by [`WorkItem::into_dispatch`].
#[derive(Debug, PartialEq, Eq)]
pub struct DispatchRequest {
    id: WorkId,
    subscriber_address: String,
    payload: Payload,
}

impl DispatchRequest {
    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn subscriber_address(&self) -> &str {
        &self.subscriber_address
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Ingestion body
// ---------------------------------------------------------------------------

/// Body of `POST /webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRequest {
    pub address: String,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Pipeline lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
