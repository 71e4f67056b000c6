// ABOUTME: Direct CLI backend - spawns the agent CLI with --print --output-format stream-json.
// ABOUTME: Parses streaming JSONL from stdout, emits AgentEvents, resumes sessions across prompts.

use crate::event::{AgentEvent, ErrorCode, Usage};
use crate::handle::{AgentHandle, Command};
use crate::options::{McpServer, McpTransport, SessionOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::{mpsc, oneshot};

/// Configuration for the Direct CLI backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectCliConfig {
    /// Path to the agent binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Working directory for the agent
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Extra arguments appended before the prompt
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for DirectCliConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            working_dir: default_working_dir(),
            extra_args: Vec::new(),
        }
    }
}

/// Per-session state kept by the worker
#[derive(Debug, Default)]
struct CliSession {
    options: SessionOptions,
    /// Session id reported by the CLI's init event, used with --resume
    cli_session_id: Option<String>,
    /// Sequence number handed to the next prompt
    next_prompt: u64,
    /// Kill switches of the prompts still running, keyed by sequence number.
    /// An abandoned prompt may still be running alongside a newer one.
    running: HashMap<u64, oneshot::Sender<()>>,
}

type Sessions = Arc<Mutex<HashMap<String, CliSession>>>;

pub struct DirectCliBackend {
    config: DirectCliConfig,
}

impl DirectCliBackend {
    pub fn new(config: DirectCliConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn into_handle(self) -> AgentHandle {
        let (tx, mut rx) = mpsc::channel::<Command>(32);
        let name = "direct";
        let config = Arc::new(self.config);
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::NewSession { options, reply } => {
                        if !options.tools.is_empty() && options.tool_server().is_none() {
                            tracing::warn!(
                                tools = ?options.tool_names(),
                                "Tools advertised without a tool server; the CLI cannot call them"
                            );
                        }
                        // The CLI assigns its own id on first use; track ours until then
                        let session_id = uuid::Uuid::new_v4().to_string();
                        lock(&sessions).insert(
                            session_id.clone(),
                            CliSession {
                                options,
                                ..Default::default()
                            },
                        );
                        let _ = reply.send(Ok(session_id));
                    }
                    Command::Prompt {
                        session_id,
                        text,
                        event_tx,
                        reply,
                    } => {
                        let (kill_tx, kill_rx) = oneshot::channel();
                        let prepared = {
                            let mut map = lock(&sessions);
                            map.get_mut(&session_id).map(|session| {
                                session.next_prompt += 1;
                                let seq = session.next_prompt;
                                session.running.insert(seq, kill_tx);
                                (seq, session.options.clone(), session.cli_session_id.clone())
                            })
                        };
                        let Some((seq, options, resume)) = prepared else {
                            let _ = reply.send(Err(anyhow::anyhow!(
                                "Unknown session: {}",
                                session_id
                            )));
                            continue;
                        };
                        let _ = reply.send(Ok(()));

                        // One task per prompt so a slow session never stalls the others
                        let config = Arc::clone(&config);
                        let sessions = Arc::clone(&sessions);
                        tokio::spawn(async move {
                            let request = PromptRequest {
                                options: &options,
                                resume: resume.as_deref(),
                                text: &text,
                            };
                            match run_prompt(&config, request, event_tx.clone(), kill_rx).await {
                                Ok(Some(cli_session_id)) => {
                                    if let Some(session) = lock(&sessions).get_mut(&session_id) {
                                        session.cli_session_id = Some(cli_session_id);
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::error!(error = %e, session_id = %session_id, "Direct CLI prompt failed");
                                    let _ = event_tx
                                        .send(AgentEvent::Error {
                                            code: ErrorCode::BackendError,
                                            message: e.to_string(),
                                            recoverable: false,
                                        })
                                        .await;
                                }
                            }
                            if let Some(session) = lock(&sessions).get_mut(&session_id) {
                                session.running.remove(&seq);
                            }
                        });
                    }
                    Command::Cancel { session_id, reply } => {
                        let kills: Vec<_> = lock(&sessions)
                            .get_mut(&session_id)
                            .map(|s| s.running.drain().map(|(_, kill)| kill).collect())
                            .unwrap_or_default();
                        tracing::debug!(session_id = %session_id, running = kills.len(), "Cancelling CLI prompts");
                        for kill in kills {
                            let _ = kill.send(());
                        }
                        let _ = reply.send(Ok(()));
                    }
                }
            }
        });

        AgentHandle::new(tx, name)
    }

    /// Factory function for the registry.
    ///
    /// The CLI reaches tools over MCP (see `SessionOptions::with_tool_server`),
    /// so the registry itself is not needed here.
    pub fn factory() -> crate::registry::BackendFactory {
        Box::new(|config, _tools| {
            let cfg: DirectCliConfig = serde_json::from_value(config.clone())?;
            let backend = DirectCliBackend::new(cfg)?;
            Ok(backend.into_handle())
        })
    }
}

fn lock(sessions: &Sessions) -> std::sync::MutexGuard<'_, HashMap<String, CliSession>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

struct PromptRequest<'a> {
    options: &'a SessionOptions,
    resume: Option<&'a str>,
    text: &'a str,
}

/// Build the CLI argument list for one prompt
fn build_args(config: &DirectCliConfig, request: &PromptRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "--print".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ];

    // Only use --resume once the CLI has told us its session id
    if let Some(resume) = request.resume {
        args.push("--resume".to_string());
        args.push(resume.to_string());
    }

    if let Some(ref model) = request.options.model {
        args.push("--model".to_string());
        args.push(model.clone());
    }

    if let Some(ref system_prompt) = request.options.system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(system_prompt.clone());
    }

    if !request.options.mcp_servers.is_empty() {
        args.push("--mcp-config".to_string());
        args.push(mcp_config(&request.options.mcp_servers).to_string());
    }

    // Tools served by the gateway show up as mcp__<server>__<tool>
    if let Some(server) = request.options.tool_server() {
        let allowed: Vec<String> = request
            .options
            .tools
            .iter()
            .map(|tool| format!("mcp__{}__{}", server.name, tool.name))
            .collect();
        if !allowed.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(allowed.join(","));
        }
    }

    args.extend(config.extra_args.iter().cloned());
    // Options such as --allowedTools take several values; end them before the prompt
    args.push("--".to_string());
    args.push(request.text.to_string());
    args
}

/// `--mcp-config` document in the CLI's `mcpServers` format
fn mcp_config(servers: &[McpServer]) -> Value {
    let entries: serde_json::Map<String, Value> = servers
        .iter()
        .map(|server| {
            let entry = match &server.transport {
                McpTransport::Stdio { command, args, env } => json!({
                    "type": "stdio",
                    "command": command,
                    "args": args,
                    "env": env,
                }),
                McpTransport::Http { url } => json!({ "type": "http", "url": url }),
            };
            (server.name.clone(), entry)
        })
        .collect();
    json!({ "mcpServers": entries })
}

/// Longest per-call timeout among the attached servers, in milliseconds
fn mcp_tool_timeout_ms(servers: &[McpServer]) -> Option<u64> {
    servers
        .iter()
        .filter_map(|s| s.timeout_secs)
        .max()
        .map(|secs| secs.saturating_mul(1000))
}

/// Run one prompt to completion. Returns the CLI's session id if it reported one.
async fn run_prompt(
    config: &DirectCliConfig,
    request: PromptRequest<'_>,
    event_tx: mpsc::Sender<AgentEvent>,
    kill_rx: oneshot::Receiver<()>,
) -> Result<Option<String>> {
    let args = build_args(config, &request);
    tracing::debug!(?args, "Spawning agent CLI");

    let mut command = ProcessCommand::new(&config.binary);
    if let Some(ms) = mcp_tool_timeout_ms(&request.options.mcp_servers) {
        command.env("MCP_TOOL_TIMEOUT", ms.to_string());
    }
    let mut child = command
        .args(&args)
        .current_dir(&config.working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to spawn agent CLI")?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stderr_handle = tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        let mut last = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.is_empty() {
                tracing::warn!(stderr = %line, "Agent CLI stderr");
                last = line;
            }
        }
        last
    });

    let mut cli_session_id = None;
    let mut saw_terminal = false;
    let stream = async {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        let mut accumulated_text = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            let Ok(json) = serde_json::from_str::<Value>(&line) else {
                tracing::debug!(line = %line, "Skipping non-JSON CLI output");
                continue;
            };
            if let Some(id) = init_session_id(&json) {
                cli_session_id = Some(id);
                continue;
            }
            if let Some(events) = parse_cli_event(&json, &mut accumulated_text) {
                for event in events {
                    saw_terminal |= event.is_terminal();
                    if event_tx.send(event).await.is_err() {
                        tracing::debug!("Event receiver closed, stopping stream");
                        return;
                    }
                }
            }
        }
    };

    let cancelled = tokio::select! {
        _ = stream => false,
        Ok(()) = kill_rx => true,
    };

    if cancelled {
        tracing::info!("Killing agent CLI after cancel");
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill agent CLI");
        }
        let _ = event_tx
            .send(AgentEvent::Error {
                code: ErrorCode::Cancelled,
                message: "Prompt cancelled".to_string(),
                recoverable: true,
            })
            .await;
        stderr_handle.abort();
        return Ok(cli_session_id);
    }

    let status = child.wait().await?;
    let last_stderr = stderr_handle.await.unwrap_or_default();

    if !status.success() && !saw_terminal {
        let mut message = format!("CLI exited with status: {:?}", status.code());
        if !last_stderr.is_empty() {
            message.push_str(": ");
            message.push_str(&last_stderr);
        }
        let _ = event_tx
            .send(AgentEvent::Error {
                code: ErrorCode::BackendError,
                message,
                recoverable: false,
            })
            .await;
    }

    Ok(cli_session_id)
}

fn init_session_id(json: &Value) -> Option<String> {
    if json.get("type")?.as_str()? != "system" {
        return None;
    }
    if json.get("subtype").and_then(|s| s.as_str()) != Some("init") {
        return None;
    }
    json.get("session_id")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
}

fn parse_cli_event(json: &Value, accumulated_text: &mut String) -> Option<Vec<AgentEvent>> {
    let event_type = json.get("type")?.as_str()?;

    match event_type {
        "assistant" => {
            let content = json
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())?;
            let mut events = Vec::new();

            for item in content {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("tool_use") => {
                        let name = str_field(item, "name");
                        let id = str_field(item, "id");
                        let input = item.get("input").cloned().unwrap_or(Value::Null);

                        tracing::info!(tool = %name, id = %id, "Tool use detected");
                        events.push(AgentEvent::ToolStart { id, name, input });
                    }
                    Some("text") => {
                        let Some(text) = item.get("text").and_then(|t| t.as_str()) else {
                            continue;
                        };
                        if text.is_empty() {
                            continue;
                        }
                        accumulated_text.push_str(text);
                        events.push(AgentEvent::Text(text.to_string()));
                    }
                    _ => {}
                }
            }

            (!events.is_empty()).then_some(events)
        }
        "user" => {
            // Tool results come back as user messages
            let content = json
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())?;
            let events: Vec<AgentEvent> = content
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
                .map(|item| AgentEvent::ToolEnd {
                    id: str_field(item, "tool_use_id"),
                    name: String::new(),
                    output: item.get("content").cloned().unwrap_or(Value::Null),
                    success: !item
                        .get("is_error")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                    duration_ms: 0,
                })
                .collect();
            (!events.is_empty()).then_some(events)
        }
        "result" => {
            let is_error = json
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            if is_error {
                let message = json
                    .get("error")
                    .or_else(|| json.get("result"))
                    .and_then(|e| e.as_str())
                    .unwrap_or("Unknown error")
                    .to_string();

                let lowered = message.to_lowercase();
                let code = if lowered.contains("timeout") {
                    ErrorCode::Timeout
                } else if lowered.contains("rate limit") {
                    ErrorCode::RateLimited
                } else if lowered.contains("permission") {
                    ErrorCode::PermissionDenied
                } else {
                    ErrorCode::BackendError
                };

                Some(vec![AgentEvent::Error {
                    code,
                    message,
                    recoverable: false,
                }])
            } else {
                let result_text = if !accumulated_text.is_empty() {
                    std::mem::take(accumulated_text)
                } else {
                    json.get("result")
                        .and_then(|r| r.as_str())
                        .unwrap_or("")
                        .to_string()
                };

                let usage = extract_usage(json);

                tracing::debug!(
                    result_len = result_text.len(),
                    input_tokens = usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
                    output_tokens = usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
                    "Sending result with usage"
                );

                Some(vec![AgentEvent::Result {
                    text: result_text,
                    usage,
                    metadata: json.clone(),
                }])
            }
        }
        _ => None,
    }
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

fn extract_usage(json: &Value) -> Option<Usage> {
    let mut usage = Usage::default();
    let mut found_usage = false;

    if let Some(cost) = json.get("total_cost_usd").and_then(|v| v.as_f64()) {
        usage.cost_usd = Some(cost);
        found_usage = true;
    }

    if let Some(usage_obj) = json.get("usage") {
        usage.input_tokens = usage_obj
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        usage.output_tokens = usage_obj
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        usage.cache_read_tokens = usage_obj
            .get("cache_read_input_tokens")
            .and_then(|v| v.as_u64());
        usage.cache_write_tokens = usage_obj
            .get("cache_creation_input_tokens")
            .and_then(|v| v.as_u64());
        found_usage = true;
    }

    found_usage.then_some(usage)
}
