//! With `max_iterations = 1` and an LLM that always wants to call a tool,
//! the run ends at the iteration budget rather than looping forever, and the
//! recovery pass makes exactly one extra LLM call to coax out a final
//! answer (spec.md §8 boundary behavior).

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use react_engine::core::LlmClient;
use react_engine::{
    CompletionRequest, CompletionResponse, EngineConfig, ReactEngine, Services, StopReason,
    TaskState, ToolCall, ToolRegistry,
};
use support::EchoTool;
use tokio_util::sync::CancellationToken;

/// Always requests the same tool call, so the run never reaches a no-tool
/// short-circuit on its own — it can only stop via the iteration budget.
/// Counts every `complete` call so the test can assert the recovery pass
/// made exactly one extra call beyond the budgeted iteration.
struct AlwaysCallsToolLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for AlwaysCallsToolLlm {
    async fn complete(&self, _request: CompletionRequest) -> react_engine::Result<CompletionResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            Ok(CompletionResponse {
                content: String::new(),
                tool_calls: vec![ToolCall::new("call-1", "echo", serde_json::json!({}))],
                stop_reason: None,
                usage: None,
                metadata: Default::default(),
            })
        } else {
            // The recovery pass's "please provide your final answer now" call.
            Ok(CompletionResponse {
                content: "Here's my best answer given what I found.".to_string(),
                tool_calls: Vec::new(),
                stop_reason: None,
                usage: None,
                metadata: Default::default(),
            })
        }
    }
}

#[tokio::test]
async fn max_iterations_one_triggers_single_recovery_call() {
    let llm = Arc::new(AlwaysCallsToolLlm { calls: AtomicUsize::new(0) });
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let services = Services::new(llm.clone(), Arc::new(registry));
    let engine = ReactEngine::new(
        EngineConfig::default().without_gates().with_max_iterations(1),
        services,
    );

    let state = TaskState::new("session-1", "task-1");
    let result = engine.run("investigate forever", state, CancellationToken::new()).await.unwrap();

    assert_eq!(result.stop_reason, StopReason::MaxIterations);
    assert_eq!(result.iterations, 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 2, "think call + exactly one recovery call");
    assert_eq!(result.answer, "Here's my best answer given what I found.");
}
