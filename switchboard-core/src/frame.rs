// ABOUTME: Wire frames streamed to clients for one turn.
// ABOUTME: Serialized as {"type":"delta","content":..}, {"type":"done"}, {"type":"error","message":..}.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Incremental output, in backend emission order
    Delta { content: String },
    /// Terminal success
    Done,
    /// Terminal failure
    Error { message: String },
}

impl Frame {
    pub fn delta(content: impl Into<String>) -> Self {
        Frame::Delta {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// `done` and `error` end a turn's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Done | Frame::Error { .. })
    }
}
