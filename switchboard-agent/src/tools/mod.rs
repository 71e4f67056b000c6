// ABOUTME: Named, schema-validated capabilities the agent may call mid-turn.
// ABOUTME: Tool trait, ToolSpec advertised to backends, and ToolRegistry with argument validation.

pub mod placeholder;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A callable capability exposed to the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the accepted arguments
    fn schema(&self) -> Value;

    /// Run the tool. Arguments have already been validated against `schema()`.
    async fn execute(&self, args: Value) -> Result<Value>;
}

/// Description of a tool as advertised to a backend session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Registry of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with perform_task, lookup_info and list_tasks
    pub fn with_defaults() -> Self {
        Self::new()
            .register(placeholder::PerformTaskTool)
            .register(placeholder::LookupInfoTool)
            .register(placeholder::ListTasksTool)
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Specs for every registered tool, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.schema(),
            })
            .collect()
    }

    /// Validate `args` against the tool's schema, then execute it
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", name))?;
        validate_args(&tool.schema(), &args)
            .map_err(|e| anyhow!("Invalid arguments for {}: {}", name, e))?;
        tracing::debug!(tool = %name, "Invoking tool");
        tool.execute(args).await
    }
}

/// Check arguments against the subset of JSON schema that tools declare:
/// object type, required properties, primitive property types, enums and
/// `additionalProperties: false`.
pub fn validate_args(schema: &Value, args: &Value) -> Result<()> {
    let Some(obj) = args.as_object() else {
        bail!("arguments must be a JSON object");
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                bail!("missing required property '{}'", key);
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let closed = schema
        .get("additionalProperties")
        .and_then(|v| v.as_bool())
        == Some(false);

    for (key, value) in obj {
        let Some(prop) = properties.and_then(|p| p.get(key)) else {
            if closed {
                bail!("unexpected property '{}'", key);
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
            if !matches_type(expected, value) {
                bail!("property '{}' must be of type {}", key, expected);
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                bail!("property '{}' must be one of {}", key, Value::Array(allowed.clone()));
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
