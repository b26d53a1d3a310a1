//! One iteration that calls a tool, followed by a second iteration where the
//! model reads the tool's result and answers directly: two iterations, one
//! tool message threaded into the transcript, then a final answer.

mod support;

use std::sync::Arc;

use react_engine::{EngineConfig, ReactEngine, Services, StopReason, TaskState, ToolCall, ToolRegistry};
use support::{EchoTool, ScriptedLlm, Turn};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn one_tool_round_trip_then_final_answer() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Turn::tool_call(ToolCall::new("call-1", "echo", serde_json::json!({"n": 7}))),
        Turn::text("The tool reported 7."),
    ]));
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let services = Services::new(llm, Arc::new(registry));
    let engine = ReactEngine::new(EngineConfig::default().without_gates(), services);

    let state = TaskState::new("session-1", "task-1");
    let result = engine.run("echo 7 for me", state, CancellationToken::new()).await.unwrap();

    assert_eq!(result.iterations, 2);
    assert_eq!(result.stop_reason, StopReason::FinalAnswer);
    assert_eq!(result.answer, "The tool reported 7.");
    assert!(result.messages.iter().any(|m| m.tool_call_id.as_deref() == Some("call-1")));
}
