// ABOUTME: Per-session options handed to a backend when a conversation is created.
// ABOUTME: Carries model, system prompt, the tool specs advertised to the agent and its MCP servers.

use crate::tools::ToolSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// MCP server name under which the gateway serves its own tool registry
pub const TOOL_SERVER_NAME: &str = "switchboard";

/// An MCP server attached to every backend session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServer {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
    /// Ceiling on a single tool call, for slow servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    /// A local process speaking MCP over stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// A streamable HTTP endpoint
    Http { url: String },
}

impl McpServer {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransport::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
            },
            timeout_secs: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: McpTransport::Http { url: url.into() },
            timeout_secs: None,
        }
    }
}

/// Options applied when a backend session is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionOptions {
    /// Model identifier, if the backend supports choosing one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt prepended to the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Tools the agent may call mid-turn
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// MCP servers the backend connects the session to
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

impl SessionOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_mcp_server(mut self, server: McpServer) -> Self {
        self.mcp_servers.retain(|s| s.name != server.name);
        self.mcp_servers.push(server);
        self
    }

    /// Serve `tools` to the agent through the gateway's MCP endpoint at `url`
    pub fn with_tool_server(self, url: impl Into<String>) -> Self {
        self.with_mcp_server(McpServer::http(TOOL_SERVER_NAME, url))
    }

    /// The MCP server carrying the gateway's own tools, if attached
    pub fn tool_server(&self) -> Option<&McpServer> {
        self.mcp_servers.iter().find(|s| s.name == TOOL_SERVER_NAME)
    }

    /// Names of the advertised tools, for logging
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}
