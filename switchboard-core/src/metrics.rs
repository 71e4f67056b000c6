// ABOUTME: Metric names and recording helpers for the gateway.
// ABOUTME: Goes through the `metrics` facade; the binary decides which recorder is installed.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Conversations constructed (counter).
pub const CONVERSATIONS_OPENED_TOTAL: &str = "switchboard_conversations_opened_total";
/// Finished turns (counter, labels: outcome).
pub const TURNS_TOTAL: &str = "switchboard_turns_total";
/// Turns refused before streaming (counter, labels: reason).
pub const TURNS_REJECTED_TOTAL: &str = "switchboard_turns_rejected_total";
/// Backend-side failures (counter).
pub const BACKEND_ERRORS_TOTAL: &str = "switchboard_backend_errors_total";
/// Tool calls reported by the backend (counter, labels: tool, success).
pub const TOOL_CALLS_TOTAL: &str = "switchboard_tool_calls_total";
/// Turn wall-clock duration (histogram, labels: outcome).
pub const TURN_DURATION_SECONDS: &str = "switchboard_turn_duration_seconds";
/// Turns currently streaming (gauge).
pub const ACTIVE_TURNS: &str = "switchboard_active_turns";

pub fn record_conversation_opened() {
    counter!(CONVERSATIONS_OPENED_TOTAL).increment(1);
}

pub fn record_turn_started() {
    gauge!(ACTIVE_TURNS).increment(1.0);
}

pub fn record_turn_finished(outcome: &'static str, elapsed: Duration) {
    gauge!(ACTIVE_TURNS).decrement(1.0);
    counter!(TURNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(TURN_DURATION_SECONDS, "outcome" => outcome).record(elapsed.as_secs_f64());
}

pub fn record_turn_rejected(reason: &'static str) {
    counter!(TURNS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_backend_error() {
    counter!(BACKEND_ERRORS_TOTAL).increment(1);
}

pub fn record_tool_call(tool: &str, success: bool) {
    counter!(
        TOOL_CALLS_TOTAL,
        "tool" => tool.to_string(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
}
