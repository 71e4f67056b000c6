// ABOUTME: Maps each conversation to the one sink allowed to receive its output right now.
// ABOUTME: Hosts the per-conversation event bridge that forwards backend deltas to that sink.

use crate::error::{GatewayError, Result};
use crate::frame::Frame;
use crate::session::TurnOutcome;
use crate::sink::OutputSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Messages flowing from a conversation's turn pumps into its bridge.
#[derive(Debug)]
pub enum BridgeEvent {
    /// Incremental output for `turn`
    Delta { turn: u64, content: String },
    /// The backend finished `turn`. The bridge relays the outcome on
    /// `reply` after every earlier delta has been forwarded.
    Finished {
        turn: u64,
        outcome: TurnOutcome,
        reply: oneshot::Sender<TurnOutcome>,
    },
}

struct Binding {
    turn: u64,
    sink: OutputSink,
}

#[derive(Default)]
pub struct ResponseMultiplexer {
    bindings: Mutex<HashMap<String, Binding>>,
}

impl std::fmt::Debug for ResponseMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMultiplexer")
            .field("bound", &self.bound_count())
            .finish()
    }
}

impl ResponseMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `sink` as the receiver for `turn` of conversation `id`.
    ///
    /// Fails if any sink is already bound for `id`; an existing binding is
    /// never overwritten.
    pub fn bind(self: &Arc<Self>, id: &str, turn: u64, sink: OutputSink) -> Result<BindingGuard> {
        let mut bindings = self.lock();
        if bindings.contains_key(id) {
            return Err(GatewayError::SinkAlreadyBound(id.to_string()));
        }
        bindings.insert(id.to_string(), Binding { turn, sink });
        tracing::debug!(conversation = %id, turn, "Sink bound");
        Ok(BindingGuard {
            mux: Arc::clone(self),
            id: id.to_string(),
            turn,
        })
    }

    /// Remove whatever is bound for `id`. Idempotent.
    pub fn unbind(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Remove the binding for `id` only if it still belongs to `turn`
    fn unbind_turn(&self, id: &str, turn: u64) -> bool {
        let mut bindings = self.lock();
        match bindings.get(id) {
            Some(binding) if binding.turn == turn => {
                bindings.remove(id);
                tracing::debug!(conversation = %id, turn, "Sink unbound");
                true
            }
            _ => false,
        }
    }

    pub fn is_bound(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn bound_count(&self) -> usize {
        self.lock().len()
    }

    /// Forward one delta to the sink bound for `id`, if that sink belongs to
    /// `turn` and is still open. Otherwise the delta is dropped.
    pub async fn forward(&self, id: &str, turn: u64, content: String) -> bool {
        let sink = {
            let bindings = self.lock();
            match bindings.get(id) {
                Some(binding) if binding.turn == turn && binding.sink.is_open() => {
                    binding.sink.clone()
                }
                Some(binding) if binding.turn != turn => {
                    tracing::debug!(conversation = %id, turn, bound_turn = binding.turn, "Dropping stale delta");
                    return false;
                }
                _ => return false,
            }
        };
        sink.send(Frame::Delta { content }).await
    }

    /// Start the long-lived bridge for one conversation. It runs until every
    /// sender for `rx` is gone.
    pub fn spawn_bridge(
        self: &Arc<Self>,
        id: String,
        mut rx: mpsc::Receiver<BridgeEvent>,
    ) -> JoinHandle<()> {
        let mux = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    BridgeEvent::Delta { turn, content } => {
                        mux.forward(&id, turn, content).await;
                    }
                    BridgeEvent::Finished {
                        turn,
                        outcome,
                        reply,
                    } => {
                        // Unbinding belongs to the turn, not the bridge
                        if reply.send(outcome).is_err() {
                            tracing::debug!(conversation = %id, turn, "Turn already finalized, discarding outcome");
                        }
                    }
                }
            }
            tracing::debug!(conversation = %id, "Event bridge stopped");
        })
    }
}

/// Keeps a binding alive for the duration of a turn; unbinds on drop.
pub struct BindingGuard {
    mux: Arc<ResponseMultiplexer>,
    id: String,
    turn: u64,
}

impl BindingGuard {
    pub fn turn(&self) -> u64 {
        self.turn
    }
}

impl Drop for BindingGuard {
    fn drop(&mut self) {
        self.mux.unbind_turn(&self.id, self.turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink;

    #[tokio::test]
    async fn test_second_bind_is_rejected_without_overwriting() {
        let mux = Arc::new(ResponseMultiplexer::new());
        let (first, mut first_stream) = sink::channel(8);
        let (second, _second_stream) = sink::channel(8);

        let _guard = mux.bind("c1", 1, first).unwrap();
        let err = mux.bind("c1", 2, second).err().unwrap();
        assert_eq!(err, GatewayError::SinkAlreadyBound("c1".into()));

        assert!(mux.forward("c1", 1, "still mine".into()).await);
        assert_eq!(first_stream.recv().await, Some(Frame::delta("still mine")));
    }

    #[tokio::test]
    async fn test_guard_unbinds_on_drop() {
        let mux = Arc::new(ResponseMultiplexer::new());
        let (s, _stream) = sink::channel(8);
        let guard = mux.bind("c1", 1, s).unwrap();
        assert!(mux.is_bound("c1"));
        drop(guard);
        assert!(!mux.is_bound("c1"));
        assert_eq!(mux.bound_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_remove_newer_binding() {
        let mux = Arc::new(ResponseMultiplexer::new());
        let (old, _old_stream) = sink::channel(8);
        let stale = mux.bind("c1", 1, old).unwrap();

        // Someone force-unbinds, a newer turn binds
        assert!(mux.unbind("c1"));
        let (new, _new_stream) = sink::channel(8);
        let _current = mux.bind("c1", 2, new).unwrap();

        drop(stale);
        assert!(mux.is_bound("c1"));
    }

    #[tokio::test]
    async fn test_unbind_is_idempotent() {
        let mux = ResponseMultiplexer::new();
        assert!(!mux.unbind("nobody"));
        assert!(!mux.unbind("nobody"));
    }

    #[tokio::test]
    async fn test_forward_drops_unbound_stale_and_closed() {
        let mux = Arc::new(ResponseMultiplexer::new());
        assert!(!mux.forward("c1", 1, "nobody listening".into()).await);

        let (s, stream) = sink::channel(8);
        let _guard = mux.bind("c1", 2, s).unwrap();
        assert!(!mux.forward("c1", 1, "from an older turn".into()).await);

        drop(stream);
        assert!(!mux.forward("c1", 2, "client gone".into()).await);
    }

    #[tokio::test]
    async fn test_bridge_forwards_deltas_before_relaying_outcome() {
        let mux = Arc::new(ResponseMultiplexer::new());
        let (s, mut stream) = sink::channel(8);
        let _guard = mux.bind("c1", 1, s).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let bridge = mux.spawn_bridge("c1".into(), rx);
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(BridgeEvent::Delta { turn: 1, content: "Hi".into() }).await.unwrap();
        tx.send(BridgeEvent::Delta { turn: 1, content: " there".into() }).await.unwrap();
        tx.send(BridgeEvent::Finished {
            turn: 1,
            outcome: TurnOutcome::Completed,
            reply: reply_tx,
        })
        .await
        .unwrap();

        assert_eq!(reply_rx.await.unwrap(), TurnOutcome::Completed);
        // Both deltas were written before the outcome was relayed
        assert_eq!(stream.recv().await, Some(Frame::delta("Hi")));
        assert_eq!(stream.recv().await, Some(Frame::delta(" there")));
        // The bridge leaves the binding alone
        assert!(mux.is_bound("c1"));

        drop(tx);
        bridge.await.unwrap();
    }
}
