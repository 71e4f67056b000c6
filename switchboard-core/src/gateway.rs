// ABOUTME: Gateway entry points: open a conversation, submit a turn and stream its frames.
// ABOUTME: Each turn runs as a small state machine that always unbinds, releases and terminates once.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::frame::Frame;
use crate::gate::GatePermit;
use crate::multiplexer::{BindingGuard, ResponseMultiplexer};
use crate::session::{validate_conversation_id, Conversation, SessionRegistry, TurnOutcome};
use crate::sink::{self, FrameStream, OutputSink};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_agent::AgentHandle;
use tokio::sync::oneshot;

/// Where a turn is in its life. Logged at debug level on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Gated,
    Streaming,
    Finalizing,
    Closed,
}

/// Diagnostic snapshot of one conversation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationInfo {
    pub id: String,
    pub backend_session: String,
    pub created_at: DateTime<Utc>,
    pub busy: bool,
    pub turns: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct GatewayStats {
    pub conversations: usize,
    pub active_turns: usize,
    pub bound_sinks: usize,
}

/// Multi-conversation front door to a single agent backend.
pub struct Gateway {
    config: GatewayConfig,
    registry: SessionRegistry,
    mux: Arc<ResponseMultiplexer>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Gateway {
    pub fn new(agent: AgentHandle, config: GatewayConfig) -> Self {
        let mux = Arc::new(ResponseMultiplexer::new());
        let registry = SessionRegistry::new(agent, config.session.clone(), Arc::clone(&mux));
        Self {
            config,
            registry,
            mux,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open (or reuse) a conversation and construct its backend session now.
    ///
    /// Without an id a UUID is generated; a supplied id is validated first.
    pub async fn open_conversation(&self, requested: Option<String>) -> Result<String> {
        let id = match requested {
            Some(id) => {
                validate_conversation_id(&id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        self.resolve(&id).await?;
        Ok(id)
    }

    /// Start a turn and return the stream its frames arrive on.
    ///
    /// Errors here happen before anything was streamed. Once a stream is
    /// returned it yields zero or more deltas and exactly one terminal frame,
    /// unless the caller drops it first.
    pub async fn submit_turn(&self, id: &str, utterance: &str) -> Result<FrameStream> {
        let result = self.start_turn(id, utterance).await;
        if let Err(ref e) = result {
            tracing::info!(conversation = %id, reason = e.kind(), error = %e, "Turn rejected");
            metrics::record_turn_rejected(e.kind());
        }
        result
    }

    async fn start_turn(&self, id: &str, utterance: &str) -> Result<FrameStream> {
        self.validate_utterance(utterance)?;

        let conversation = if self.config.implicit_open {
            validate_conversation_id(id)?;
            self.resolve(id).await?
        } else {
            self.registry
                .get(id)
                .ok_or_else(|| GatewayError::UnknownConversation(id.to_string()))?
        };

        let permit = conversation
            .gate()
            .try_acquire()
            .ok_or_else(|| GatewayError::ConversationBusy(id.to_string()))?;
        let turn = conversation.next_turn();
        log_transition(id, turn, TurnState::Idle, TurnState::Gated);

        let (sink, stream) = sink::channel(self.config.sink_capacity);
        // The permit drops on this error path, so the gate reopens
        let binding = self.mux.bind(id, turn, sink.clone())?;

        tracing::info!(
            conversation = %id,
            turn,
            utterance_bytes = utterance.len(),
            "Turn started"
        );
        let completion = conversation.submit(turn, utterance.to_string());

        let driver = TurnDriver {
            conversation,
            turn,
            state: TurnState::Gated,
            permit,
            binding,
            sink,
            timeout: self.config.turn_timeout,
            cancel_on_disconnect: self.config.cancel_on_disconnect,
        };
        tokio::spawn(driver.run(completion));

        Ok(stream)
    }

    fn validate_utterance(&self, utterance: &str) -> Result<()> {
        if utterance.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        if utterance.len() > self.config.max_utterance_bytes {
            return Err(GatewayError::InvalidRequest(format!(
                "message too large ({} bytes, max {})",
                utterance.len(),
                self.config.max_utterance_bytes
            )));
        }
        Ok(())
    }

    async fn resolve(&self, id: &str) -> Result<Arc<Conversation>> {
        let (conversation, created) = self.registry.get_or_create(id).await?;
        if created {
            metrics::record_conversation_opened();
        }
        Ok(conversation)
    }

    pub fn conversation_info(&self, id: &str) -> Option<ConversationInfo> {
        self.registry.get(id).map(|c| ConversationInfo {
            id: c.id().to_string(),
            backend_session: c.backend_session().to_string(),
            created_at: c.created_at(),
            busy: c.is_busy(),
            turns: c.turns(),
        })
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            conversations: self.registry.len(),
            active_turns: self.registry.busy_count(),
            bound_sinks: self.mux.bound_count(),
        }
    }
}

fn log_transition(id: &str, turn: u64, from: TurnState, to: TurnState) {
    tracing::debug!(conversation = %id, turn, ?from, ?to, "Turn state");
}

/// How a turn came to an end
enum TurnEnding {
    Completed,
    Failed(GatewayError),
    Disconnected,
}

impl TurnEnding {
    fn label(&self) -> &'static str {
        match self {
            TurnEnding::Completed => "done",
            TurnEnding::Failed(GatewayError::TurnTimeout(_)) => "timeout",
            TurnEnding::Failed(_) => "error",
            TurnEnding::Disconnected => "disconnected",
        }
    }

    fn terminal_frame(&self) -> Option<Frame> {
        match self {
            TurnEnding::Completed => Some(Frame::Done),
            TurnEnding::Failed(e) => Some(Frame::error(e.client_message())),
            TurnEnding::Disconnected => None,
        }
    }
}

/// Owns everything one turn holds and gives it all back exactly once.
struct TurnDriver {
    conversation: Arc<Conversation>,
    turn: u64,
    state: TurnState,
    permit: GatePermit,
    binding: BindingGuard,
    sink: OutputSink,
    timeout: Duration,
    cancel_on_disconnect: bool,
}

impl TurnDriver {
    fn advance(&mut self, to: TurnState) {
        log_transition(self.conversation.id(), self.turn, self.state, to);
        self.state = to;
    }

    async fn run(mut self, completion: oneshot::Receiver<TurnOutcome>) {
        let started = Instant::now();
        metrics::record_turn_started();
        self.advance(TurnState::Streaming);

        let sink = self.sink.clone();
        let ending = tokio::select! {
            biased;
            _ = sink.closed() => TurnEnding::Disconnected,
            result = tokio::time::timeout(self.timeout, completion) => match result {
                Ok(Ok(TurnOutcome::Completed)) => TurnEnding::Completed,
                Ok(Ok(TurnOutcome::Failed(message))) => {
                    TurnEnding::Failed(GatewayError::BackendTurnError(message))
                }
                Ok(Err(_)) => TurnEnding::Failed(GatewayError::BackendTurnError(
                    "Turn ended without an outcome".to_string(),
                )),
                Err(_) => TurnEnding::Failed(GatewayError::TurnTimeout(self.timeout)),
            },
        };

        self.finalize(ending, started).await;
    }

    async fn finalize(mut self, ending: TurnEnding, started: Instant) {
        self.advance(TurnState::Finalizing);
        let TurnDriver {
            conversation,
            turn,
            permit,
            binding,
            sink,
            cancel_on_disconnect,
            ..
        } = self;

        drop(binding);
        permit.release();
        let wrote = sink.finish(ending.terminal_frame()).await;

        let elapsed = started.elapsed();
        metrics::record_turn_finished(ending.label(), elapsed);
        match &ending {
            TurnEnding::Failed(e) => tracing::warn!(
                conversation = %conversation.id(),
                turn,
                outcome = ending.label(),
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Turn failed"
            ),
            _ => tracing::info!(
                conversation = %conversation.id(),
                turn,
                outcome = ending.label(),
                terminal_written = wrote,
                elapsed_ms = elapsed.as_millis() as u64,
                "Turn finished"
            ),
        }

        if matches!(ending, TurnEnding::Disconnected) && cancel_on_disconnect {
            let conversation = Arc::clone(&conversation);
            tokio::spawn(async move { conversation.cancel_backend().await });
        }

        log_transition(conversation.id(), turn, TurnState::Finalizing, TurnState::Closed);
    }
}
