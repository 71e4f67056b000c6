// ABOUTME: Registry pattern for runtime backend selection.
// ABOUTME: Backends register factories, the gateway creates one by name from config.

use crate::config::BackendConfig;
use crate::handle::AgentHandle;
use crate::tools::ToolRegistry;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Factory function that creates an AgentHandle from config.
///
/// Backends that execute tools themselves receive the gateway's tool registry.
pub type BackendFactory =
    Box<dyn Fn(&Value, &ToolRegistry) -> Result<AgentHandle> + Send + Sync>;

/// Registry for runtime backend selection
pub struct AgentRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl AgentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory by name
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Value, &ToolRegistry) -> Result<AgentHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Create a backend by name with the given config
    pub fn create(&self, name: &str, config: &Value, tools: &ToolRegistry) -> Result<AgentHandle> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("Unknown backend: {}", name))?;
        factory(config, tools)
    }

    /// List available backend names
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Create a backend from a BackendConfig
    pub fn create_from_config(
        &self,
        config: &BackendConfig,
        tools: &ToolRegistry,
    ) -> Result<AgentHandle> {
        let json_config = config.to_json_value();
        self.create(config.backend_type(), &json_config, tools)
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        use crate::backends::direct_cli::DirectCliBackend;
        use crate::backends::mock::MockBackend;

        Self::new()
            .register("mock", MockBackend::factory())
            .register("direct", DirectCliBackend::factory())
    }
}
