// ABOUTME: Wires configuration, the agent backend and the gateway together
// ABOUTME: Shared by the HTTP server and the chat REPL

use crate::config::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use switchboard_agent::{AgentRegistry, ToolRegistry};
use switchboard_core::Gateway;

/// Create the configured backend and the gateway in front of it.
///
/// With `serve_tools` the sessions are pointed at this server's `/mcp`
/// endpoint, which runs `tools`.
pub fn build_gateway(
    config: &Config,
    tools: &ToolRegistry,
    serve_tools: bool,
) -> Result<Arc<Gateway>> {
    let registry = AgentRegistry::default();
    let agent = registry
        .create_from_config(&config.backend, tools)
        .with_context(|| {
            format!(
                "Failed to create '{}' backend (available: {})",
                config.backend.backend_type(),
                registry.available().join(", ")
            )
        })?;

    let mut gateway_config = config.gateway_config(tools);
    if serve_tools && !tools.is_empty() {
        gateway_config.session = gateway_config
            .session
            .with_tool_server(config.tool_server_url());
    }
    tracing::info!(
        backend = %config.backend.backend_type(),
        tools = ?gateway_config.session.tool_names(),
        tool_server = ?gateway_config.session.tool_server().map(|s| &s.name),
        turn_timeout_secs = gateway_config.turn_timeout.as_secs(),
        implicit_open = gateway_config.implicit_open,
        cancel_on_disconnect = gateway_config.cancel_on_disconnect,
        "Gateway ready"
    );

    Ok(Arc::new(Gateway::new(agent, gateway_config)))
}
