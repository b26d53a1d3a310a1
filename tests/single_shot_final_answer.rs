//! A model that answers directly, with no tool calls, ends the run on its
//! first iteration with a final answer and no dangling orchestrator state.

mod support;

use std::sync::Arc;

use react_engine::{EngineConfig, ReactEngine, Services, StopReason, TaskState, ToolRegistry};
use support::{ScriptedLlm, Turn};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn single_shot_final_answer_ends_run_immediately() {
    let llm = Arc::new(ScriptedLlm::new(vec![Turn::text("The capital of France is Paris.")]));
    let services = Services::new(llm, Arc::new(ToolRegistry::new()));
    let engine = ReactEngine::new(EngineConfig::default().without_gates(), services);

    let state = TaskState::new("session-1", "task-1");
    let result = engine
        .run("What is the capital of France?", state, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.answer, "The capital of France is Paris.");
    assert_eq!(result.iterations, 1);
    assert_eq!(result.stop_reason, StopReason::FinalAnswer);
    assert!(result.attachments.is_empty());
}
