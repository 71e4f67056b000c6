// ABOUTME: Pluggable agent backend abstraction for switchboard.
// ABOUTME: Provides command-channel backends (direct CLI, mock), Send+Sync handles, and the tool registry.

pub mod config;
pub mod event;
pub mod handle;
pub mod options;
pub mod registry;
pub mod tools;

pub mod backends;

pub use config::BackendConfig;
pub use event::{AgentEvent, ErrorCode, Usage};
pub use handle::{AgentHandle, EventReceiver};
pub use options::{McpServer, McpTransport, SessionOptions, TOOL_SERVER_NAME};
pub use registry::{AgentRegistry, BackendFactory};
pub use tools::{Tool, ToolRegistry, ToolSpec};
