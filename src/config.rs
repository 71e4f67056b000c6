// ABOUTME: TOML configuration for the switchboard binary with environment variable overrides
// ABOUTME: Searches SWITCHBOARD_CONFIG_PATH, ./config.toml, then ~/.config/switchboard/config.toml

use crate::paths;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchboard_agent::{BackendConfig, McpServer, SessionOptions, ToolRegistry};
use switchboard_core::GatewayConfig;

pub const CONFIG_PATH_ENV: &str = "SWITCHBOARD_CONFIG_PATH";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, concise assistant. \
You can record work with the perform_task tool, answer factual questions with \
the lookup_info tool, and show outstanding work with the list_tasks tool. \
When the user asks you to do something, use the appropriate tool to accomplish it.";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory of static files served for unmatched paths (the chat page)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Base URL the agent uses to reach this server's `/mcp` tool endpoint
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySettings {
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_max_utterance_bytes")]
    pub max_utterance_bytes: usize,
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    #[serde(default = "default_true")]
    pub implicit_open: bool,
    #[serde(default)]
    pub cancel_on_disconnect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Extra MCP servers attached to every conversation
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_turn_timeout_secs() -> u64 {
    switchboard_core::config::DEFAULT_TURN_TIMEOUT.as_secs()
}

fn default_max_utterance_bytes() -> usize {
    switchboard_core::config::DEFAULT_MAX_UTTERANCE_BYTES
}

fn default_sink_capacity() -> usize {
    switchboard_core::config::DEFAULT_SINK_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
            public_url: None,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            turn_timeout_secs: default_turn_timeout_secs(),
            max_utterance_bytes: default_max_utterance_bytes(),
            sink_capacity: default_sink_capacity(),
            implicit_open: true,
            cancel_on_disconnect: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: default_system_prompt(),
            mcp_servers: Vec::new(),
        }
    }
}

impl Config {
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration, searching the usual locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit path, or search when `None`.
    ///
    /// Environment overrides are applied after the file, then the result is validated.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::find_config_file(),
        };

        let mut config = if let Some(config_path) = path {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("PORT") {
            self.server.port = val
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("SWITCHBOARD_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("BACKEND_TYPE") {
            self.backend.backend_type = val;
        }
        if let Ok(val) = std::env::var("BACKEND_BINARY") {
            self.backend.set("binary", val);
        }
        if let Ok(val) = std::env::var("BACKEND_MODEL") {
            self.session.model = Some(val);
        }
        if let Ok(val) = std::env::var("TURN_TIMEOUT_SECS") {
            self.gateway.turn_timeout_secs = val.parse().with_context(|| {
                format!("TURN_TIMEOUT_SECS must be a valid number, got: {}", val)
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.turn_timeout_secs == 0 {
            bail!("gateway.turn_timeout_secs must be greater than 0");
        }
        if self.gateway.sink_capacity == 0 {
            bail!("gateway.sink_capacity must be greater than 0");
        }
        if self.gateway.max_utterance_bytes == 0 {
            bail!("gateway.max_utterance_bytes must be greater than 0");
        }
        if self.backend.backend_type.trim().is_empty() {
            bail!("backend.type must not be empty");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Where the agent reaches the gateway's tools
    pub fn tool_server_url(&self) -> String {
        let base = match self.server.public_url {
            Some(ref url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.server.host.as_str() {
                    "0.0.0.0" | "::" => "127.0.0.1",
                    host => host,
                };
                format!("http://{}:{}", host, self.server.port)
            }
        };
        format!("{}/mcp", base)
    }

    /// Gateway settings, advertising every tool in `tools` to new conversations
    pub fn gateway_config(&self, tools: &ToolRegistry) -> GatewayConfig {
        let mut session = SessionOptions::default()
            .with_system_prompt(self.session.system_prompt.clone())
            .with_tools(tools.specs());
        if let Some(ref model) = self.session.model {
            session = session.with_model(model.clone());
        }
        for server in &self.session.mcp_servers {
            session = session.with_mcp_server(server.clone());
        }

        GatewayConfig {
            turn_timeout: Duration::from_secs(self.gateway.turn_timeout_secs),
            max_utterance_bytes: self.gateway.max_utterance_bytes,
            sink_capacity: self.gateway.sink_capacity,
            implicit_open: self.gateway.implicit_open,
            cancel_on_disconnect: self.gateway.cancel_on_disconnect,
            session,
        }
    }
}
