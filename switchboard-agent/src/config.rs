// ABOUTME: Backend selection config embedded in the gateway's TOML file.
// ABOUTME: A `type` discriminator plus free-form fields handed to the backend factory.

use serde::{Deserialize, Serialize};

/// Backend configuration with type discriminator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Backend type: "direct" or "mock"
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,

    /// Remaining fields passed to backend factory
    #[serde(flatten)]
    pub config: toml::Table,
}

fn default_backend_type() -> String {
    "direct".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            config: toml::Table::new(),
        }
    }
}

impl BackendConfig {
    /// Get backend type name
    pub fn backend_type(&self) -> &str {
        &self.backend_type
    }

    /// Set a string-valued factory field (used for env var overrides)
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.config
            .insert(key.to_string(), toml::Value::String(value.into()));
    }

    /// Read a string-valued factory field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Convert config table to serde_json::Value for registry
    pub fn to_json_value(&self) -> serde_json::Value {
        // TOML tables always serialize to JSON objects
        serde_json::to_value(&self.config).unwrap_or_else(|_| serde_json::json!({}))
    }
}
