//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` spans for the crisis path. Field names use
//! OpenTelemetry dot notation so they export cleanly.
//!
//! # Span Hierarchy
//!
//! ```text
//! crisis.activate          (one per activation or escalation)
//!   └─ crisis.action       (one per dispatched intervention)
//! crisis.integration       (one per collaborator hook invocation)
//! crisis.health            (periodic fallback health check)
//! ```

use tracing::Span;

// ── Span Name Constants ──────────────────────────────────────────────

pub const SPAN_ACTIVATE: &str = "crisis.activate";
pub const SPAN_ACTION: &str = "crisis.action";
pub const SPAN_INTEGRATION: &str = "crisis.integration";
pub const SPAN_HEALTH: &str = "crisis.health";

// ── Targets ──────────────────────────────────────────────────────────

/// Dedicated target for latency-budget violations on the crisis path.
pub const SAFETY_TARGET: &str = "crisis_engine::safety";

/// Target for critical collaborator events surfaced outside the log review.
pub const INTEGRATION_TARGET: &str = "crisis_engine::integration";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_EVENT_ID: &str = "crisis.event_id";
pub const FIELD_SEVERITY: &str = "crisis.severity";
pub const FIELD_TRIGGER: &str = "crisis.trigger";
pub const FIELD_ACTION_KIND: &str = "crisis.action.kind";
pub const FIELD_ACTION_ATTEMPT: &str = "crisis.action.attempt";
pub const FIELD_SUCCESS: &str = "crisis.success";
pub const FIELD_DURATION_MS: &str = "crisis.duration_ms";
pub const FIELD_HOOK: &str = "crisis.integration.hook";
pub const FIELD_SYSTEM: &str = "crisis.integration.system";

// ── Span Builders ────────────────────────────────────────────────────

/// Span covering an activation or escalation.
///
/// Fields filled later via [`record_activation_result`]: event id, duration.
pub fn activate_span(trigger: &str, severity: &str) -> Span {
    tracing::info_span!(
        "crisis.activate",
        "crisis.trigger" = %trigger,
        "crisis.severity" = %severity,
        "crisis.event_id" = tracing::field::Empty,
        "crisis.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_activation_result(span: &Span, event_id: &str, duration_ms: u64) {
    span.record("crisis.event_id", event_id);
    span.record("crisis.duration_ms", duration_ms);
}

/// Span for one dispatched intervention.
pub fn action_span(kind: &str, event_id: Option<&str>, attempt: u32) -> Span {
    tracing::info_span!(
        "crisis.action",
        "crisis.action.kind" = %kind,
        "crisis.event_id" = event_id.unwrap_or("none"),
        "crisis.action.attempt" = attempt,
        "crisis.success" = tracing::field::Empty,
        "crisis.duration_ms" = tracing::field::Empty,
    )
}

pub fn record_action_result(span: &Span, success: bool, duration_ms: u64) {
    span.record("crisis.success", success);
    span.record("crisis.duration_ms", duration_ms);
}

/// Span for a collaborator hook invocation.
pub fn integration_span(hook: &str, system: &str) -> Span {
    tracing::info_span!(
        "crisis.integration",
        "crisis.integration.hook" = %hook,
        "crisis.integration.system" = %system,
    )
}

pub fn health_span() -> Span {
    tracing::debug_span!("crisis.health", "crisis.duration_ms" = tracing::field::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_subscriber() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .try_init();
        });
    }

    #[test]
    fn test_activate_span_records_event() {
        init_test_subscriber();
        let span = activate_span("suicidal_ideation", "critical");
        assert!(!span.is_disabled());
        record_activation_result(&span, "evt-1", 12);
    }

    #[test]
    fn test_action_span_without_event() {
        init_test_subscriber();
        let span = action_span("hotline", None, 0);
        assert!(!span.is_disabled());
        record_action_result(&span, true, 3);
    }

    #[test]
    fn test_field_constants_use_dot_notation() {
        for field in [
            FIELD_EVENT_ID,
            FIELD_SEVERITY,
            FIELD_TRIGGER,
            FIELD_ACTION_KIND,
            FIELD_ACTION_ATTEMPT,
            FIELD_SUCCESS,
            FIELD_DURATION_MS,
            FIELD_HOOK,
            FIELD_SYSTEM,
        ] {
            assert!(field.starts_with("crisis."), "{field}");
        }
    }
}
