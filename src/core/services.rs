//! The injected collaborator interfaces ("Services bundle") the engine is
//! built against. None of these are implemented here beyond test doubles —
//! concrete LLM clients, tool implementations, and context managers are
//! explicitly out of scope (spec non-goals); only the contracts live in
//! this crate.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use super::types::{CompletionRequest, CompletionResponse, Message};

/// Milliseconds since the Unix epoch. Kept as a free function (rather than
/// `chrono::Utc::now()` sprinkled through the engine) so the one call site
/// feeding `BaseEvent::timestamp_ms` is easy to fake in tests via `Clock`.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A streaming delta callback invoked by `LlmClient::stream_complete`.
/// `is_final` is true on the terminal invocation, at which point `delta` is
/// the empty string and the response's `content` carries the full text.
pub type ContentDeltaCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Abstraction over the model backend. HTTP framing, retries, and
/// provider-specific request shaping are the caller's concern; the engine
/// only ever sees `CompletionRequest`/`CompletionResponse`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Streaming variant used by the final-answer summarizer. The default
    /// implementation falls back to a single non-streaming call (mirrors
    /// the teacher's types anticipating but never wiring up streaming).
    async fn stream_complete(
        &self,
        request: CompletionRequest,
        on_delta: ContentDeltaCallback,
    ) -> Result<CompletionResponse> {
        let response = self.complete(request).await?;
        on_delta(&response.content, true);
        Ok(response)
    }
}

/// Recovers tool calls from freeform assistant text when the LLM client
/// didn't return native tool-call objects.
pub trait FunctionCallParser: Send + Sync {
    fn parse(&self, content: &str) -> Result<Vec<crate::core::types::ToolCall>>;
}

/// A parser that never finds tool calls — useful when the LLM client always
/// returns native tool-call objects.
pub struct NoopFunctionCallParser;
impl FunctionCallParser for NoopFunctionCallParser {
    fn parse(&self, _content: &str) -> Result<Vec<crate::core::types::ToolCall>> {
        Ok(Vec::new())
    }
}

/// Estimates token usage for a message list; backs `TaskState::token_count`.
pub trait ContextManager: Send + Sync {
    fn estimate_tokens(&self, messages: &[Message]) -> usize;
}

/// `~4 chars/token` heuristic, matching the teacher's `Conversation::truncate_to_tokens`.
pub struct HeuristicContextManager;
impl ContextManager for HeuristicContextManager {
    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

/// Observability hook for per-node lifecycle, independent of event emission.
/// Implementations must be idempotent on repeat `ensure_node` calls.
#[async_trait]
pub trait WorkflowTracker: Send + Sync {
    async fn ensure_node(&self, id: &str, input: Option<serde_json::Value>);
    async fn start_node(&self, id: &str);
    async fn complete_success(&self, id: &str, output: Option<serde_json::Value>);
    async fn complete_failure(&self, id: &str, err: &str);
}

/// A `WorkflowTracker` that does nothing — the default when no external
/// observability sink is configured (tracking doesn't affect execution).
pub struct NoopWorkflowTracker;
#[async_trait]
impl WorkflowTracker for NoopWorkflowTracker {
    async fn ensure_node(&self, _id: &str, _input: Option<serde_json::Value>) {}
    async fn start_node(&self, _id: &str) {}
    async fn complete_success(&self, _id: &str, _output: Option<serde_json::Value>) {}
    async fn complete_failure(&self, _id: &str, _err: &str) {}
}

/// The full set of collaborators the engine needs, bundled for injection.
pub struct Services {
    pub llm_client: Arc<dyn LlmClient>,
    pub tools: Arc<crate::tools::ToolRegistry>,
    pub parser: Arc<dyn FunctionCallParser>,
    pub context_manager: Arc<dyn ContextManager>,
    pub workflow_tracker: Arc<dyn WorkflowTracker>,
}

impl Services {
    pub fn new(llm_client: Arc<dyn LlmClient>, tools: Arc<crate::tools::ToolRegistry>) -> Self {
        Services {
            llm_client,
            tools,
            parser: Arc::new(NoopFunctionCallParser),
            context_manager: Arc::new(HeuristicContextManager),
            workflow_tracker: Arc::new(NoopWorkflowTracker),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn FunctionCallParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_context_manager(mut self, context_manager: Arc<dyn ContextManager>) -> Self {
        self.context_manager = context_manager;
        self
    }

    pub fn with_workflow_tracker(mut self, tracker: Arc<dyn WorkflowTracker>) -> Self {
        self.workflow_tracker = tracker;
        self
    }
}

/// Wraps an `EventListener` trait object so the dispatcher can hand it to
/// worker tasks that emit `tool_progress` events concurrently.
pub type SharedEventListener = Arc<dyn super::events::EventListener>;
