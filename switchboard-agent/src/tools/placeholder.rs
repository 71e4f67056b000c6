// ABOUTME: Placeholder tools shipped with the gateway: perform_task, lookup_info, list_tasks.
// ABOUTME: They log the request and return canned structured results until real data sources are wired in.

use super::Tool;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Executes a named task with instructions and an optional priority.
pub struct PerformTaskTool;

#[async_trait]
impl Tool for PerformTaskTool {
    fn name(&self) -> &str {
        "perform_task"
    }

    fn description(&self) -> &str {
        "Execute a specific task given a name and detailed instructions. \
         Use this tool when the user asks to perform an action."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "taskName": {
                    "type": "string",
                    "description": "Short name describing the task"
                },
                "instructions": {
                    "type": "string",
                    "description": "Detailed instructions for the task"
                },
                "priority": {
                    "type": "string",
                    "enum": ["low", "medium", "high"],
                    "description": "Priority level of the task"
                }
            },
            "required": ["taskName", "instructions"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Params {
            task_name: String,
            instructions: String,
            priority: Option<String>,
        }
        let params: Params = serde_json::from_value(args)?;
        let priority = params.priority.unwrap_or_else(|| "medium".to_string());

        tracing::info!(
            task = %params.task_name,
            priority = %priority,
            instructions = %params.instructions,
            "Executing task"
        );

        Ok(json!({
            "status": "completed",
            "taskName": params.task_name,
            "priority": priority,
            "result": format!("Task \"{}\" has been processed successfully.", params.task_name),
        }))
    }
}

/// Looks up a topic in the knowledge base.
pub struct LookupInfoTool;

#[async_trait]
impl Tool for LookupInfoTool {
    fn name(&self) -> &str {
        "lookup_info"
    }

    fn description(&self) -> &str {
        "Look up information from the knowledge base on a given topic. \
         Use this when the user asks a factual question about something specific."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query or topic to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            query: String,
        }
        let params: Params = serde_json::from_value(args)?;
        tracing::info!(query = %params.query, "Looking up");

        Ok(json!({
            "query": params.query,
            "results": [{
                "title": format!("Information about \"{}\"", params.query),
                "summary": "This is a placeholder result. Connect your own data source here.",
            }],
        }))
    }
}

/// Lists tracked tasks filtered by status.
pub struct ListTasksTool;

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List all pending or completed tasks tracked by the agent. \
         Use this when the user wants to see task status."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "completed"],
                    "description": "Filter tasks by status"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let filter = args
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("all")
            .to_string();
        tracing::info!(filter = %filter, "Listing tasks");

        Ok(json!({
            "filter": filter,
            "tasks": [
                {"id": 1, "name": "Example task", "status": "pending", "priority": "medium"}
            ],
            "message": "Connect a real task store to persist and manage tasks.",
        }))
    }
}
