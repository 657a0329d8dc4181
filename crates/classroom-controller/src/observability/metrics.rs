//! Metrics definitions for the Classroom Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded: room codes and participant names never appear as
//! label values. `endpoint` is normalized to route templates.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle for `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("cc_http".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("cc_generator".to_string()),
            &[0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000],
        )
        .map_err(|e| format!("Failed to set generator latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `cc_http_requests_total`, `cc_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("cc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        101 | 200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace room codes and topic ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/api/v1/token" | "/api/v1/rooms"
        | "/api/v1/activity" => path.to_string(),
        _ => normalize_room_endpoint(path),
    }
}

fn normalize_room_endpoint(path: &str) -> String {
    let Some(rest) = path.strip_prefix("/api/v1/rooms/") else {
        return "/other".to_string();
    };

    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [_code] => "/api/v1/rooms/{code}".to_string(),
        [_code, action]
            if matches!(
                *action,
                "join" | "start" | "end" | "topics" | "answers" | "transcripts" | "voice"
                    | "report" | "ws"
            ) =>
        {
            format!("/api/v1/rooms/{{code}}/{action}")
        }
        [_code, "topics", action] if matches!(*action, "generate" | "next") => {
            format!("/api/v1/rooms/{{code}}/topics/{action}")
        }
        [_code, "topics", _id, action] if matches!(*action, "trigger" | "close") => {
            format!("/api/v1/rooms/{{code}}/topics/{{id}}/{action}")
        }
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Room Metrics
// ============================================================================

/// Metric: `cc_rooms_created_total`
pub fn record_room_created() {
    counter!("cc_rooms_created_total").increment(1);
}

/// Metric: `cc_rooms_ended_total`
pub fn record_room_ended() {
    counter!("cc_rooms_ended_total").increment(1);
}

/// Metric: `cc_rooms` (gauge, rooms held by the directory)
#[allow(clippy::cast_precision_loss)]
pub fn set_room_count(count: usize) {
    gauge!("cc_rooms").set(count as f64);
}

/// Metric: `cc_room_joins_total`
/// Labels: `role`
pub fn record_room_join(role: &str) {
    counter!("cc_room_joins_total", "role" => role.to_string()).increment(1);
}

// ============================================================================
// Quiz Metrics
// ============================================================================

/// Metric: `cc_quiz_rounds_total`
/// Labels: `event` (triggered, closed, rejected), `reason`
pub fn record_quiz_round(event: &str, reason: &str) {
    counter!("cc_quiz_rounds_total",
        "event" => event.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Metric: `cc_quiz_answers_total`
/// Labels: `correct`
pub fn record_quiz_answer(correct: bool) {
    counter!("cc_quiz_answers_total", "correct" => correct.to_string()).increment(1);
}

// ============================================================================
// Focus / Log Metrics
// ============================================================================

/// Metric: `cc_focus_events_total`
/// Labels: `kind`, `outcome` (accepted, suppressed, direct)
pub fn record_focus_event(kind: &str, outcome: &str) {
    counter!("cc_focus_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Metric: `cc_log_appends_total`
/// Labels: `table`, `status`
pub fn record_log_append(table: &str, status: &str) {
    counter!("cc_log_appends_total",
        "table" => table.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Metric: `cc_bus_messages_total`
/// Labels: `type`
pub fn record_bus_message(kind: &str) {
    counter!("cc_bus_messages_total", "type" => kind.to_string()).increment(1);
}

// ============================================================================
// Voice / Generator Metrics
// ============================================================================

/// Metric: `cc_voice_triggers_total`
/// Labels: `outcome` (fired, cooldown, rejected)
pub fn record_voice_trigger(outcome: &str) {
    counter!("cc_voice_triggers_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `cc_generator_requests_total`, `cc_generator_duration_seconds`
/// Labels: `status`
pub fn record_generator_request(status: &str, duration: Duration) {
    histogram!("cc_generator_duration_seconds").record(duration.as_secs_f64());
    counter!("cc_generator_requests_total", "status" => status.to_string()).increment(1);
}
