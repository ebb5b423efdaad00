//! Question cycle spans.

use tracing::{span, Level, Span};
use uuid::Uuid;

/// Span wrapping one question from submission to answer.
pub fn cycle_span(cycle_id: Uuid) -> Span {
    span!(
        Level::INFO,
        "cycle",
        cycle.id = %cycle_id,
        cycle.state = tracing::field::Empty,
    )
}

/// Span for one completion-service request.
pub fn completion_span(model: &str, purpose: &'static str) -> Span {
    span!(
        Level::INFO,
        "completion",
        otel.kind = "client",
        gen_ai.request.model = model,
        completion.purpose = purpose,
        completion.latency_ms = tracing::field::Empty,
    )
}
