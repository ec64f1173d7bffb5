//! Execution engine for model-requested tool calls
//!
//! Every call yields an Observation; tool failures are reported to the model
//! instead of aborting the run.

use crate::models::{ExecutionStatus, Observation, ToolCall, ToolInput};
use crate::tools::ToolRegistry;
use chrono::Utc;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs tool calls against a registry
pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self { tool_registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.tool_registry
    }

    /// Execute a single call and record what happened.
    pub async fn execute(&self, call: &ToolCall) -> Observation {
        debug!(tool_name = %call.name, call_id = %call.id, "Executing tool call");

        let start = Instant::now();
        let status;
        let tool_output;

        match self.tool_registry.require(&call.name) {
            Ok(tool) if !call.arguments.is_object() && !call.arguments.is_null() => {
                status = ExecutionStatus::Failed;
                tool_output = json!({
                    "error": format!(
                        "Arguments for {} must be a JSON object, got: {}",
                        tool.name(),
                        call.arguments
                    )
                });
            }
            Ok(tool) => {
                let parameters = if call.arguments.is_null() {
                    json!({})
                } else {
                    call.arguments.clone()
                };
                let input = ToolInput::new(call.name.clone(), parameters);

                match tool.execute(&input).await {
                    Ok(output) if output.success => {
                        status = ExecutionStatus::Success;
                        tool_output = output.data;
                    }
                    Ok(output) => {
                        warn!(
                            tool_name = %call.name,
                            error = output.error.as_deref().unwrap_or("unknown"),
                            "Tool reported failure"
                        );
                        status = ExecutionStatus::Failed;
                        tool_output = output.data;
                    }
                    Err(e) => {
                        warn!(tool_name = %call.name, error = %e, "Tool execution failed");
                        status = ExecutionStatus::Failed;
                        tool_output = json!({
                            "error": format!("Error executing tool '{}': {}", call.name, e)
                        });
                    }
                }
            }
            Err(e) => {
                warn!(tool_name = %call.name, "Tool not registered");
                status = ExecutionStatus::Skipped;
                tool_output = json!({
                    "error": format!(
                        "{}. Available tools: {}",
                        e,
                        self.tool_registry.list().join(", ")
                    )
                });
            }
        }

        Observation {
            observation_id: Uuid::new_v4(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            tool_input: call.arguments.clone(),
            tool_output,
            execution_time_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CalculatorTool;
    use std::sync::Arc;

    fn engine() -> ExecutionEngine {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CalculatorTool));
        ExecutionEngine::new(registry)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_successful_call() {
        let obs = engine()
            .execute(&call("calculator", json!({ "expression": "2 * 21" })))
            .await;
        assert_eq!(obs.status, ExecutionStatus::Success);
        assert_eq!(obs.tool_output, json!({ "result": 42.0 }));
        assert_eq!(obs.call_id, "call_1");
    }

    #[tokio::test]
    async fn test_failures_become_observations() {
        let engine = engine();

        let reported = engine
            .execute(&call("calculator", json!({ "expression": "1/0" })))
            .await;
        assert_eq!(reported.status, ExecutionStatus::Failed);
        assert!(reported.tool_output["error"].as_str().unwrap().contains("division by zero"));

        let missing_input = engine.execute(&call("calculator", json!({}))).await;
        assert_eq!(missing_input.status, ExecutionStatus::Failed);
        assert!(missing_input.tool_output["error"]
            .as_str()
            .unwrap()
            .contains("Error executing tool 'calculator'"));

        let raw_string = engine.execute(&call("calculator", json!("2 + 2"))).await;
        assert_eq!(raw_string.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_skipped() {
        let obs = engine().execute(&call("web_search", json!({}))).await;
        assert_eq!(obs.status, ExecutionStatus::Skipped);
        let error = obs.tool_output["error"].as_str().unwrap();
        assert!(error.starts_with("Tool not found: web_search."));
        assert!(error.contains("calculator"));
    }
}
