// ABOUTME: Typed failures of the gateway core.
// ABOUTME: Every variant is recovered at the turn boundary and becomes a frame or a request-level error.

use std::time::Duration;

/// Errors surfaced by the gateway.
///
/// Pre-stream failures are returned from [`crate::Gateway::submit_turn`];
/// failures after streaming started become a single `error` frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Malformed conversation id or utterance.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Turn submitted for an id that was never opened (implicit open disabled).
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// The backend could not construct a conversation.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A turn is already in flight for this conversation.
    #[error("conversation {0} already has a turn in progress")]
    ConversationBusy(String),

    /// An output sink is already bound for this conversation.
    #[error("conversation {0} already has a bound output sink")]
    SinkAlreadyBound(String),

    /// The turn exceeded the configured ceiling.
    #[error("turn timed out after {}s", .0.as_secs())]
    TurnTimeout(Duration),

    /// The backend reported a failure for this turn.
    #[error("backend turn failed: {0}")]
    BackendTurnError(String),
}

impl GatewayError {
    /// Stable snake_case label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::UnknownConversation(_) => "unknown_conversation",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::ConversationBusy(_) => "conversation_busy",
            GatewayError::SinkAlreadyBound(_) => "sink_already_bound",
            GatewayError::TurnTimeout(_) => "turn_timeout",
            GatewayError::BackendTurnError(_) => "backend_turn_error",
        }
    }

    /// Message written into an `error` frame for the client
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::BackendUnavailable(_) => "Failed to initialise session".to_string(),
            GatewayError::ConversationBusy(_) | GatewayError::SinkAlreadyBound(_) => {
                "Session is busy — wait for the previous response to finish".to_string()
            }
            GatewayError::UnknownConversation(_) => {
                "Unknown session — call POST /api/sessions first".to_string()
            }
            GatewayError::BackendTurnError(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
