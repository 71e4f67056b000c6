// ABOUTME: MCP (Model Context Protocol) endpoint serving the gateway's tool registry
// ABOUTME: JSON-RPC over HTTP: initialize, tools/list and tools/call, validated through ToolRegistry::invoke

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

pub async fn mcp_handler(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    tracing::debug!(method = %request.method, "MCP request received");

    let response = match request.method.as_str() {
        "initialize" => JsonRpcResponse::result(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": switchboard_agent::TOOL_SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "notifications/initialized" | "ping" => JsonRpcResponse::result(request.id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = state
                .tools
                .specs()
                .into_iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "inputSchema": spec.schema,
                    })
                })
                .collect();
            JsonRpcResponse::result(request.id, json!({ "tools": tools }))
        }
        "tools/call" => call_tool(&state, request.id, &request.params).await,
        other => JsonRpcResponse::error(request.id, -32601, format!("Method not found: {}", other)),
    };

    Json(response)
}

/// Tool failures are reported as `isError` results so the agent can react to them
async fn call_tool(state: &AppState, id: Option<Value>, params: &Value) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::error(id, -32602, "Missing tool name".to_string());
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    tracing::info!(tool = %name, "MCP tool call");
    match state.tools.invoke(name, arguments).await {
        Ok(output) => JsonRpcResponse::result(
            id,
            json!({ "content": [{ "type": "text", "text": output.to_string() }] }),
        ),
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "MCP tool call failed");
            JsonRpcResponse::result(
                id,
                json!({
                    "content": [{ "type": "text", "text": e.to_string() }],
                    "isError": true
                }),
            )
        }
    }
}
