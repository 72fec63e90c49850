//! Request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{info, warn};

use crate::ingest::Rejection;
use crate::model::Payload;

use super::AppState;

/// `GET /`
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `POST /webhook` with `{"address": "..."}`.
///
/// The body is decoded by hand so every decoding problem, including a missing
/// field, is a 400 rather than axum's 415/422 split.
pub async fn webhook(State(state): State<AppState>, body: Bytes) -> Response {
    match state.ingress.submit_json(&body).await {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "id": id.0 }))).into_response(),
        Err(rejection) => {
            let status = match rejection {
                Rejection::Malformed(_) => StatusCode::BAD_REQUEST,
                Rejection::Unavailable | Rejection::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(json!({ "error": rejection.to_string() }))).into_response()
        }
    }
}

/// `POST /subscriber` with `{"payload": "<base64>"}`.
///
/// Stand-in receiver for local testing. Always answers 200, even for bodies it
/// cannot decode.
pub async fn subscriber(body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Payload>(&body) {
        Ok(payload) => info!(
            len = payload.len(),
            payload = %String::from_utf8_lossy(&payload.bytes),
            "subscriber received payload"
        ),
        Err(e) => warn!(error = %e, "subscriber could not decode payload"),
    }
    StatusCode::OK
}
