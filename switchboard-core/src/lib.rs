// ABOUTME: Conversation lifecycle manager and streaming delta multiplexer.
// ABOUTME: Turns client utterances into per-conversation agent turns and streams frames back.

pub mod config;
pub mod error;
pub mod frame;
pub mod gate;
pub mod gateway;
pub mod metrics;
pub mod multiplexer;
pub mod session;
pub mod sink;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use frame::Frame;
pub use gate::{ConcurrencyGate, GatePermit};
pub use gateway::{ConversationInfo, Gateway, GatewayStats, TurnState};
pub use multiplexer::{BindingGuard, BridgeEvent, ResponseMultiplexer};
pub use session::{validate_conversation_id, Conversation, SessionRegistry, TurnOutcome};
pub use sink::{FrameStream, OutputSink};
