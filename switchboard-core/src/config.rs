// ABOUTME: Runtime knobs for the gateway core.
// ABOUTME: Timeout ceiling, size limits, implicit open and disconnect policy, per-conversation session options.

use std::time::Duration;
use switchboard_agent::SessionOptions;

/// Default ceiling on a whole turn (5 minutes)
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);
/// Default utterance size limit (64 KiB)
pub const DEFAULT_MAX_UTTERANCE_BYTES: usize = 64 * 1024;
/// Default unread frames buffered per turn
pub const DEFAULT_SINK_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub turn_timeout: Duration,
    pub max_utterance_bytes: usize,
    pub sink_capacity: usize,
    /// A turn for an unknown id creates the conversation
    pub implicit_open: bool,
    /// Also send a backend cancel when the client disconnects mid-turn
    pub cancel_on_disconnect: bool,
    /// Options every conversation is created with
    pub session: SessionOptions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            max_utterance_bytes: DEFAULT_MAX_UTTERANCE_BYTES,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            implicit_open: true,
            cancel_on_disconnect: false,
            session: SessionOptions::default(),
        }
    }
}

impl GatewayConfig {
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_implicit_open(mut self, implicit_open: bool) -> Self {
        self.implicit_open = implicit_open;
        self
    }

    pub fn with_cancel_on_disconnect(mut self, cancel: bool) -> Self {
        self.cancel_on_disconnect = cancel;
        self
    }

    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }
}
