// ABOUTME: AgentHandle: the one Send+Sync way the gateway drives any backend.
// ABOUTME: Requests travel to the backend's worker task over mpsc and are answered on oneshot replies.

use crate::{AgentEvent, SessionOptions};
use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};

/// Per-prompt event buffer
const EVENT_CHANNEL_CAPACITY: usize = 2048;

/// Requests a backend worker must answer
#[derive(Debug)]
pub enum Command {
    NewSession {
        options: SessionOptions,
        reply: oneshot::Sender<Result<String>>,
    },
    /// Start a prompt; its events go to `event_tx`, `reply` acknowledges the start
    Prompt {
        session_id: String,
        text: String,
        event_tx: mpsc::Sender<AgentEvent>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Stop every prompt still running in the session
    Cancel {
        session_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<Command>,
    name: &'static str,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("name", &self.name).finish()
    }
}

impl AgentHandle {
    pub fn new(tx: mpsc::Sender<Command>, name: &'static str) -> Self {
        Self { tx, name }
    }

    /// Backend name as registered
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Send `command` built around a fresh reply channel and wait for the answer
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| anyhow!("Backend worker closed ({})", self.name))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("Backend worker dropped the reply ({})", self.name))?
    }

    /// Returns the backend's id for the new session
    pub async fn new_session(&self, options: &SessionOptions) -> Result<String> {
        let options = options.clone();
        self.request(|reply| Command::NewSession { options, reply })
            .await
    }

    /// Resolves once the backend has accepted the prompt; events follow on the receiver
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<EventReceiver> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.request(|reply| Command::Prompt {
            session_id: session_id.to_string(),
            text: text.to_string(),
            event_tx,
            reply,
        })
        .await?;
        Ok(EventReceiver::new(event_rx))
    }

    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.request(|reply| Command::Cancel {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }
}

/// One prompt's events, ending after a terminal event or when the backend drops its sender.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventReceiver {
    pub fn new(rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }
}
