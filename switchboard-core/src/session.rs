// ABOUTME: Conversations and the registry that creates each one exactly once per id.
// ABOUTME: A Conversation owns its backend session, its gate and the sender side of its event bridge.

use crate::error::{GatewayError, Result};
use crate::gate::ConcurrencyGate;
use crate::multiplexer::{BridgeEvent, ResponseMultiplexer};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use switchboard_agent::{AgentEvent, AgentHandle, SessionOptions};
use tokio::sync::{mpsc, oneshot, OnceCell};

/// Bridge messages buffered per conversation
const BRIDGE_CAPACITY: usize = 256;

/// Longest accepted caller-supplied conversation id
pub const MAX_CONVERSATION_ID_LEN: usize = 128;

/// How the backend ended a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(String),
}

/// Check a caller-supplied conversation id: 1-128 chars of `[A-Za-z0-9_.:-]`.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:\-]{1,128}$").ok());
    if pattern.as_ref().is_some_and(|re| re.is_match(id)) {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "conversation id must be 1-{} characters of letters, digits, '_', '.', ':' or '-'",
            MAX_CONVERSATION_ID_LEN
        )))
    }
}

/// One ongoing exchange with the backend.
pub struct Conversation {
    id: String,
    backend_session: String,
    agent: AgentHandle,
    gate: Arc<ConcurrencyGate>,
    bridge_tx: mpsc::Sender<BridgeEvent>,
    created_at: DateTime<Utc>,
    turns: AtomicU64,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("backend_session", &self.backend_session)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl Conversation {
    /// Ask the backend for a new session and install the event bridge.
    pub async fn create(
        id: &str,
        agent: AgentHandle,
        options: &SessionOptions,
        mux: &Arc<ResponseMultiplexer>,
    ) -> Result<Self> {
        let backend_session = agent
            .new_session(options)
            .await
            .map_err(|e| GatewayError::BackendUnavailable(e.to_string()))?;

        let (bridge_tx, bridge_rx) = mpsc::channel(BRIDGE_CAPACITY);
        mux.spawn_bridge(id.to_string(), bridge_rx);

        tracing::info!(
            conversation = %id,
            backend = agent.name(),
            backend_session = %backend_session,
            tools = ?options.tool_names(),
            "Created conversation"
        );

        Ok(Self {
            id: id.to_string(),
            backend_session,
            agent,
            gate: Arc::new(ConcurrencyGate::new()),
            bridge_tx,
            created_at: Utc::now(),
            turns: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend_session(&self) -> &str {
        &self.backend_session
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Turns started so far
    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub(crate) fn next_turn(&self) -> u64 {
        self.turns.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Hand `utterance` to the backend as `turn`. Deltas flow through the
    /// bridge; the returned receiver resolves once they have all been
    /// forwarded.
    pub fn submit(&self, turn: u64, utterance: String) -> oneshot::Receiver<TurnOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        let agent = self.agent.clone();
        let session = self.backend_session.clone();
        let bridge = self.bridge_tx.clone();
        let id = self.id.clone();

        tokio::spawn(async move {
            let outcome = pump(&agent, &session, &id, turn, &utterance, &bridge).await;
            let finished = BridgeEvent::Finished {
                turn,
                outcome,
                reply: done_tx,
            };
            if bridge.send(finished).await.is_err() {
                tracing::warn!(conversation = %id, turn, "Event bridge closed before turn finished");
            }
        });

        done_rx
    }

    /// Ask the backend to stop whatever it is doing for this conversation
    pub async fn cancel_backend(&self) {
        if let Err(e) = self.agent.cancel(&self.backend_session).await {
            tracing::warn!(conversation = %self.id, error = %e, "Backend cancel failed");
        }
    }
}

/// Drain one prompt's events into the bridge and report how it ended.
async fn pump(
    agent: &AgentHandle,
    session: &str,
    id: &str,
    turn: u64,
    utterance: &str,
    bridge: &mpsc::Sender<BridgeEvent>,
) -> TurnOutcome {
    let mut events = match agent.prompt(session, utterance).await {
        Ok(events) => events,
        Err(e) => {
            crate::metrics::record_backend_error();
            return TurnOutcome::Failed(format!("Failed to submit prompt: {}", e));
        }
    };

    let mut streamed = false;
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::Text(content) => {
                if content.is_empty() {
                    continue;
                }
                streamed = true;
                if bridge
                    .send(BridgeEvent::Delta { turn, content })
                    .await
                    .is_err()
                {
                    return TurnOutcome::Failed("Event bridge closed".to_string());
                }
            }
            AgentEvent::ToolStart { id: call_id, name, .. } => {
                tracing::info!(conversation = %id, turn, tool = %name, call = %call_id, "Tool call started");
            }
            AgentEvent::ToolEnd {
                name,
                success,
                duration_ms,
                ..
            } => {
                tracing::info!(conversation = %id, turn, tool = %name, success, duration_ms, "Tool call finished");
                crate::metrics::record_tool_call(&name, success);
            }
            AgentEvent::Result { text, usage, .. } => {
                // Backends that do not stream still produce one delta
                if !streamed
                    && !text.is_empty()
                    && bridge
                        .send(BridgeEvent::Delta {
                            turn,
                            content: text,
                        })
                        .await
                        .is_err()
                {
                    return TurnOutcome::Failed("Event bridge closed".to_string());
                }
                if let Some(usage) = usage {
                    tracing::debug!(
                        conversation = %id,
                        turn,
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "Turn usage"
                    );
                }
                return TurnOutcome::Completed;
            }
            AgentEvent::Error { code, message, .. } => {
                tracing::warn!(conversation = %id, turn, ?code, error = %message, "Backend reported an error");
                crate::metrics::record_backend_error();
                return TurnOutcome::Failed(message);
            }
        }
    }

    crate::metrics::record_backend_error();
    TurnOutcome::Failed("Backend closed the event stream without a result".to_string())
}

type Slot = Arc<OnceCell<Arc<Conversation>>>;

/// Owns id -> Conversation. Creation is lazy and happens at most once per id.
pub struct SessionRegistry {
    agent: AgentHandle,
    options: SessionOptions,
    mux: Arc<ResponseMultiplexer>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(agent: AgentHandle, options: SessionOptions, mux: Arc<ResponseMultiplexer>) -> Self {
        Self {
            agent,
            options,
            mux,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the conversation for `id`, constructing it if needed.
    ///
    /// Concurrent callers with the same id share one construction. A failed
    /// construction leaves nothing behind, so the next call starts over.
    /// The flag is true when this call created the conversation.
    pub async fn get_or_create(&self, id: &str) -> Result<(Arc<Conversation>, bool)> {
        let slot = {
            let mut slots = self.lock();
            Arc::clone(slots.entry(id.to_string()).or_default())
        };

        let created = AtomicBool::new(false);
        let result = slot
            .get_or_try_init(|| async {
                created.store(true, Ordering::Release);
                Conversation::create(id, self.agent.clone(), &self.options, &self.mux)
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned();

        match result {
            Ok(conversation) => Ok((conversation, created.load(Ordering::Acquire))),
            Err(e) => {
                self.discard_failed(id, &slot);
                tracing::warn!(conversation = %id, error = %e, "Conversation construction failed");
                Err(e)
            }
        }
    }

    /// Drop an empty slot after a failed construction, unless another caller
    /// is still waiting on it (that caller will retry the construction).
    fn discard_failed(&self, id: &str, slot: &Slot) {
        let mut slots = self.lock();
        let removable = slots.get(id).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(slot) == 2
        });
        if removable {
            slots.remove(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Conversation>> {
        self.lock().get(id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Fully constructed conversations
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Conversations with a turn in flight
    pub fn busy_count(&self) -> usize {
        self.lock()
            .values()
            .filter_map(|slot| slot.get())
            .filter(|c| c.is_busy())
            .count()
    }
}
