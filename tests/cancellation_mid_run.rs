//! A run cancelled between iterations returns an error result carrying the
//! partial transcript and `stop_reason = cancelled`, rather than continuing
//! to a second `think` call.

mod support;

use std::sync::Arc;

use async_trait::async_trait;

use react_engine::core::LlmClient;
use react_engine::{
    CompletionRequest, CompletionResponse, EngineConfig, Error, ReactEngine, Services, StopReason,
    TaskState, ToolCall, ToolRegistry,
};
use support::EchoTool;
use tokio_util::sync::CancellationToken;

/// Answers with a tool call on the first completion, then cancels the token
/// it was handed before a second `think` call could ever be made.
struct CancelAfterFirstCall {
    token: CancellationToken,
}

#[async_trait]
impl LlmClient for CancelAfterFirstCall {
    async fn complete(&self, _request: CompletionRequest) -> react_engine::Result<CompletionResponse> {
        self.token.cancel();
        Ok(CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new("call-1", "echo", serde_json::json!({}))],
            stop_reason: None,
            usage: None,
            metadata: Default::default(),
        })
    }
}

#[tokio::test]
async fn cancellation_observed_between_iterations_short_circuits() {
    let token = CancellationToken::new();
    let llm = Arc::new(CancelAfterFirstCall { token: token.clone() });
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    let services = Services::new(llm, Arc::new(registry));
    let engine = ReactEngine::new(EngineConfig::default().without_gates(), services);

    let state = TaskState::new("session-1", "task-1");
    let err = engine.run("do something", state, token).await.unwrap_err();

    assert!(matches!(err.source, Error::Cancelled));
    assert_eq!(err.result.stop_reason, StopReason::Cancelled);
}
