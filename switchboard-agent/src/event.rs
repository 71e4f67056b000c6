// ABOUTME: Event types emitted by agent backends during prompt execution.
// ABOUTME: Text deltas, tool lifecycle, and the two terminal events (Result, Error).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a backend reports while a prompt runs. Every prompt ends with exactly
/// one `Result` or `Error`; anything after that is ignored by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AgentEvent {
    /// Incremental reply text, forwarded to the client as a delta frame
    Text(String),

    ToolStart {
        id: String,
        name: String,
        input: Value,
    },

    /// `id` pairs it with the matching `ToolStart`
    ToolEnd {
        id: String,
        name: String,
        output: Value,
        success: bool,
        duration_ms: u64,
    },

    /// Full reply text. Backends that never streamed `Text` rely on the gateway
    /// to turn this into a single delta.
    Result {
        text: String,
        usage: Option<Usage>,
        metadata: Value,
    },

    Error {
        code: ErrorCode,
        message: String,
        /// True when retrying the same prompt may succeed
        recoverable: bool,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Result { .. } | AgentEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    RateLimited,
    PermissionDenied,
    /// Prompt stopped by a cancel request
    Cancelled,
    BackendError,
    Unknown,
}

/// Token accounting as the backend reports it; cache and cost figures are optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: Option<u64>,
    pub cache_write_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}
