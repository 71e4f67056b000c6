// ABOUTME: Mock backend for testing - plays back pre-configured event scripts.
// ABOUTME: Supports pacing, stalls, tool calls, session failures, and records what it was asked to do.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_agent::backends::mock::MockBackend;
//! use switchboard_agent::{AgentEvent, SessionOptions};
//!
//! # async fn example() {
//! let mock = MockBackend::new()
//!     .on_prompt("hello").respond_deltas(&["Hi", " there"])
//!     .on_prompt("slow").paced(std::time::Duration::from_millis(50)).respond_text("eventually");
//!
//! let handle = mock.into_handle();
//! let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();
//! let mut receiver = handle.prompt(&session_id, "hello").await.unwrap();
//!
//! while let Some(event) = receiver.recv().await {
//!     if let AgentEvent::Text(delta) = event {
//!         print!("{}", delta);
//!     }
//! }
//! # }
//! ```

use crate::event::{AgentEvent, ErrorCode};
use crate::handle::{AgentHandle, Command};
use crate::options::SessionOptions;
use crate::tools::ToolRegistry;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One step of a scripted mock response
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Emit an event as-is
    Emit(AgentEvent),
    /// Pause before the next step
    Sleep(Duration),
    /// Run a tool through the attached registry, emitting ToolStart/ToolEnd
    CallTool { name: String, args: Value },
}

/// Mock backend for testing
pub struct MockBackend {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    state: MockState,
    tools: Option<ToolRegistry>,
    session_delay: Duration,
}

struct Expectation {
    pattern: String,
    delay: Duration,
    pace: Duration,
    steps: Vec<MockStep>,
}

/// Shared view of what the mock backend has been asked to do.
///
/// Cloning is cheap; grab one with [`MockBackend::state`] before calling
/// `into_handle`, then inspect it from the test.
#[derive(Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<MockStateInner>>,
}

#[derive(Default)]
struct MockStateInner {
    sessions_created: usize,
    failures_remaining: usize,
    prompts: HashMap<String, Vec<String>>,
    options: HashMap<String, SessionOptions>,
    cancelled: HashSet<String>,
    cancellations: usize,
    completed_prompts: usize,
}

impl MockState {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockStateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sessions successfully created
    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }

    /// Prompts received for a session, in arrival order
    pub fn prompts(&self, session_id: &str) -> Vec<String> {
        self.lock()
            .prompts
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Prompts received across all sessions
    pub fn total_prompts(&self) -> usize {
        self.lock().prompts.values().map(|p| p.len()).sum()
    }

    /// Prompts whose scripts ran to the end
    pub fn completed_prompts(&self) -> usize {
        self.lock().completed_prompts
    }

    /// Options the session was created with
    pub fn session_options(&self, session_id: &str) -> Option<SessionOptions> {
        self.lock().options.get(session_id).cloned()
    }

    /// Number of cancel commands received
    pub fn cancellations(&self) -> usize {
        self.lock().cancellations
    }

    fn take_cancelled(&self, session_id: &str) -> bool {
        self.lock().cancelled.remove(session_id)
    }
}

impl MockBackend {
    /// Create a new mock backend with no expectations
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            state: MockState::default(),
            tools: None,
            session_delay: Duration::ZERO,
        }
    }

    /// Set up an expectation for a prompt matching the given pattern
    pub fn on_prompt(self, pattern: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            backend: self,
            pattern: pattern.to_string(),
            delay: Duration::ZERO,
            pace: Duration::ZERO,
        }
    }

    /// Attach a tool registry used by `MockStep::CallTool`
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Delay every session creation (to widen concurrency windows in tests)
    pub fn with_session_delay(mut self, delay: Duration) -> Self {
        self.session_delay = delay;
        self
    }

    /// Make the next `n` session creations fail
    pub fn fail_next_sessions(self, n: usize) -> Self {
        self.state.lock().failures_remaining = n;
        self
    }

    /// Handle to the shared record of sessions, prompts and cancellations
    pub fn state(&self) -> MockState {
        self.state.clone()
    }

    /// Convert this backend into an AgentHandle
    pub fn into_handle(self) -> AgentHandle {
        let (tx, mut rx) = mpsc::channel::<Command>(32);
        let name = "mock";
        let MockBackend {
            expectations,
            state,
            tools,
            session_delay,
        } = self;

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::NewSession { options, reply } => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if !session_delay.is_zero() {
                                tokio::time::sleep(session_delay).await;
                            }
                            let result = {
                                let mut inner = state.lock();
                                if inner.failures_remaining > 0 {
                                    inner.failures_remaining -= 1;
                                    Err(anyhow::anyhow!("mock backend refused to create a session"))
                                } else {
                                    inner.sessions_created += 1;
                                    let session_id =
                                        format!("mock-session-{}", inner.sessions_created);
                                    inner.options.insert(session_id.clone(), options);
                                    Ok(session_id)
                                }
                            };
                            let _ = reply.send(result);
                        });
                    }
                    Command::Prompt {
                        session_id,
                        text,
                        event_tx,
                        reply,
                    } => {
                        {
                            let mut inner = state.lock();
                            inner.cancelled.remove(&session_id);
                            inner
                                .prompts
                                .entry(session_id.clone())
                                .or_default()
                                .push(text.clone());
                        }
                        let _ = reply.send(Ok(()));

                        let expectation = take_matching(&expectations, &text);
                        let state = state.clone();
                        let tools = tools.clone();
                        tokio::spawn(async move {
                            match expectation {
                                Some(exp) => {
                                    run_script(&session_id, exp, tools.as_ref(), &state, &event_tx)
                                        .await
                                }
                                None => {
                                    let _ = event_tx
                                        .send(AgentEvent::Result {
                                            text: format!("Mock: no expectation for '{}'", text),
                                            usage: None,
                                            metadata: json!({}),
                                        })
                                        .await;
                                    state.lock().completed_prompts += 1;
                                }
                            }
                        });
                    }
                    Command::Cancel { session_id, reply } => {
                        {
                            let mut inner = state.lock();
                            inner.cancellations += 1;
                            inner.cancelled.insert(session_id);
                        }
                        let _ = reply.send(Ok(()));
                    }
                }
            }
        });

        AgentHandle::new(tx, name)
    }

    /// Factory function for the registry
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|_config, tools| {
            let backend = MockBackend::new().with_tools(tools.clone());
            Ok(backend.into_handle())
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Match expectations with FIFO preference: check the front first,
/// fall back to the first matching one further back in the queue.
fn take_matching(expectations: &Mutex<VecDeque<Expectation>>, text: &str) -> Option<Expectation> {
    let mut exp = expectations.lock().unwrap_or_else(|e| e.into_inner());
    match exp.front() {
        Some(front) if text.contains(&front.pattern) => exp.pop_front(),
        Some(_) => exp
            .iter()
            .position(|e| text.contains(&e.pattern))
            .and_then(|i| exp.remove(i)),
        None => None,
    }
}

async fn run_script(
    session_id: &str,
    expectation: Expectation,
    tools: Option<&ToolRegistry>,
    state: &MockState,
    event_tx: &mpsc::Sender<AgentEvent>,
) {
    if !expectation.delay.is_zero() {
        tokio::time::sleep(expectation.delay).await;
    }

    for (i, step) in expectation.steps.into_iter().enumerate() {
        if i > 0 && !expectation.pace.is_zero() {
            tokio::time::sleep(expectation.pace).await;
        }
        if state.take_cancelled(session_id) {
            let _ = event_tx
                .send(AgentEvent::Error {
                    code: ErrorCode::Cancelled,
                    message: "Prompt cancelled".to_string(),
                    recoverable: true,
                })
                .await;
            return;
        }

        let events = match step {
            MockStep::Emit(event) => vec![event],
            MockStep::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                continue;
            }
            MockStep::CallTool { name, args } => call_tool(i, &name, args, tools).await,
        };

        for event in events {
            if event_tx.send(event).await.is_err() {
                tracing::debug!(session_id = %session_id, "Event receiver closed, stopping script");
                return;
            }
        }
    }

    state.lock().completed_prompts += 1;
}

async fn call_tool(
    step: usize,
    name: &str,
    args: Value,
    tools: Option<&ToolRegistry>,
) -> Vec<AgentEvent> {
    let id = format!("call-{}", step);
    let start = AgentEvent::ToolStart {
        id: id.clone(),
        name: name.to_string(),
        input: args.clone(),
    };

    let started = Instant::now();
    let (output, success) = match tools {
        Some(registry) => match registry.invoke(name, args).await {
            Ok(output) => (output, true),
            Err(e) => (json!({ "error": e.to_string() }), false),
        },
        None => (json!({ "error": "no tool registry attached" }), false),
    };

    vec![
        start,
        AgentEvent::ToolEnd {
            id,
            name: name.to_string(),
            output,
            success,
            duration_ms: started.elapsed().as_millis() as u64,
        },
    ]
}

/// Builder for setting up mock expectations with a fluent API
pub struct ExpectationBuilder {
    backend: MockBackend,
    pattern: String,
    delay: Duration,
    pace: Duration,
}

impl ExpectationBuilder {
    /// Wait before emitting the first event
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wait between consecutive steps
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// Respond with a scripted sequence of steps
    pub fn respond_script(self, steps: Vec<MockStep>) -> MockBackend {
        self.backend
            .expectations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Expectation {
                pattern: self.pattern,
                delay: self.delay,
                pace: self.pace,
                steps,
            });
        self.backend
    }

    /// Respond with a list of events
    pub fn respond_with(self, events: Vec<AgentEvent>) -> MockBackend {
        self.respond_script(events.into_iter().map(MockStep::Emit).collect())
    }

    /// Respond with a simple text result
    pub fn respond_text(self, text: &str) -> MockBackend {
        self.respond_with(vec![AgentEvent::Result {
            text: text.to_string(),
            usage: None,
            metadata: json!({}),
        }])
    }

    /// Stream each delta as a Text event, then finish with their concatenation
    pub fn respond_deltas(self, deltas: &[&str]) -> MockBackend {
        let mut events: Vec<AgentEvent> = deltas
            .iter()
            .map(|d| AgentEvent::Text(d.to_string()))
            .collect();
        events.push(AgentEvent::Result {
            text: deltas.concat(),
            usage: None,
            metadata: json!({}),
        });
        self.respond_with(events)
    }

    /// Respond with an error
    pub fn respond_error(self, code: ErrorCode, message: &str) -> MockBackend {
        self.respond_with(vec![AgentEvent::Error {
            code,
            message: message.to_string(),
            recoverable: false,
        }])
    }

    /// Stream the deltas, then go quiet for `duration` before finishing
    pub fn stall_after(self, deltas: &[&str], duration: Duration) -> MockBackend {
        let mut steps: Vec<MockStep> = deltas
            .iter()
            .map(|d| MockStep::Emit(AgentEvent::Text(d.to_string())))
            .collect();
        steps.push(MockStep::Sleep(duration));
        steps.push(MockStep::Emit(AgentEvent::Result {
            text: deltas.concat(),
            usage: None,
            metadata: json!({}),
        }));
        self.respond_script(steps)
    }
}
