// ABOUTME: Root library module for the switchboard binary
// ABOUTME: Exposes configuration, app wiring, the HTTP server, its MCP tool endpoint and the chat REPL

pub mod app;
pub mod config;
pub mod mcp;
pub mod paths;
pub mod repl;
pub mod server;

// Re-export the gateway crates for convenience
pub use switchboard_agent::{AgentEvent, AgentHandle, AgentRegistry, ToolRegistry};
pub use switchboard_core::{Frame, Gateway, GatewayConfig, GatewayError};
