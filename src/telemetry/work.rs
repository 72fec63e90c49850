//! Work item span helpers.
//!
//! Provides span creation and stage-transition recording for work items
//! flowing through the pipeline.

use tracing::Span;

use crate::model::WorkId;

/// Start a span covering one work item's trip through a stage.
///
/// The `work.stage` field is declared empty and can be updated via
/// [`record_stage_transition`].
pub fn start_item_span(id: WorkId, subscriber_address: &str) -> Span {
    tracing::info_span!(
        "work.item",
        "work.id" = %id,
        "work.subscriber" = subscriber_address,
        "work.stage" = tracing::field::Empty,
    )
}

/// Record a stage transition event on the given span.
pub fn record_stage_transition(span: &Span, from: &str, to: &str) {
    span.record("work.stage", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "stage_transition");
    });
}
