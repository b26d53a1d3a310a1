//! Tool registry — maps tool names to executors available to the LLM.

use std::collections::HashMap;

use crate::core::types::{ToolCall, ToolDefinition, ToolResult};

use super::traits::{Tool, ToolContext};

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Tool definitions for the think step's completion request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Execute a call, never failing — a missing tool or an execution error
    /// is folded into a `ToolResult` carrying `error`, per the dispatcher's
    /// non-fatal per-call error policy.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let mut result = match self.get(&call.name) {
            Some(tool) => match tool.execute(call.arguments.clone(), ctx).await {
                Ok(output) => {
                    let mut result = ToolResult::success(call.id.clone(), output.content);
                    result.attachments = output.attachments;
                    result.metadata = output.metadata;
                    result
                }
                Err(e) => ToolResult::failure(call.id.clone(), e.to_string()),
            },
            None => ToolResult::failure(call.id.clone(), format!("tool not found: {}", call.name)),
        };
        result.fill_correlation_from(call);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &super::ToolContext) -> crate::error::Result<super::ToolOutput> {
            Ok(args.to_string().into())
        }
    }

    #[tokio::test]
    async fn missing_tool_yields_synthetic_error_result() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("c1", "nonexistent", json!({}));
        let result = registry.execute(&call, &super::ToolContext::noop()).await;
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("tool not found"));
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let call = ToolCall::new("c1", "echo", json!({"x": 1}));
        let result = registry.execute(&call, &super::ToolContext::noop()).await;
        assert!(!result.is_error());
        assert_eq!(result.content, r#"{"x":1}"#);
    }
}
