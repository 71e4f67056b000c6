// ABOUTME: Backend implementations (direct CLI, mock).
// ABOUTME: Each backend runs a worker task and exposes itself through AgentHandle.

pub mod direct_cli;
pub mod mock;
