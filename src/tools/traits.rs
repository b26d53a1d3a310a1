//! Core tool trait.
//!
//! Individual tool implementations (file IO, shell, web search, ...) are
//! out of scope for this crate — only the interface tools plug into.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::types::{Attachment, TaskState, ToolDefinition};
use crate::error::Result;

/// What a tool call produces: the content the model/user sees, any
/// attachments it generated, and optional metadata the dispatcher inspects
/// for attachment mutation directives or feedback signals (§4.2/§4.3).
/// Plain string results coerce into this via `From`, so tools with nothing
/// to report beyond text content don't need to construct one explicitly.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: String,
    pub attachments: HashMap<String, Attachment>,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        ToolOutput {
            content: content.into(),
            attachments: HashMap::new(),
            metadata: None,
        }
    }

    /// Attach a generated artifact, keyed by its own name.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.insert(attachment.name.clone(), attachment);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<String> for ToolOutput {
    fn from(content: String) -> Self {
        ToolOutput::text(content)
    }
}

impl From<&str> for ToolOutput {
    fn from(content: &str) -> Self {
        ToolOutput::text(content)
    }
}

/// A progress chunk emitter handed to a tool's `execute` call, wrapping the
/// dispatcher's `tool_progress` event emission (§4.2 step 4). `is_complete`
/// is true on the final chunk.
pub struct ProgressEmitter(Box<dyn Fn(&str, bool) + Send + Sync>);

impl ProgressEmitter {
    pub fn new(f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        ProgressEmitter(Box::new(f))
    }

    pub fn emit(&self, chunk: &str, is_complete: bool) {
        (self.0)(chunk, is_complete)
    }

    /// A silent emitter, used by callers that don't observe progress (tests,
    /// the registry's own bare `execute` convenience).
    pub fn noop() -> Self {
        ProgressEmitter::new(|_, _| {})
    }
}

/// Per-call execution context a tool observes: a frozen attachment snapshot
/// taken at batch start, a progress emitter, and — for tools that delegate to
/// a sub-agent or nested run — a deep clone of the task state snapshot so the
/// delegate can read (but never mutate back) the parent's conversation.
pub struct ToolContext {
    pub attachments: HashMap<String, Attachment>,
    pub progress: ProgressEmitter,
    pub task_snapshot: Option<TaskState>,
}

impl ToolContext {
    pub fn noop() -> Self {
        ToolContext {
            attachments: HashMap::new(),
            progress: ProgressEmitter::noop(),
            task_snapshot: None,
        }
    }
}

/// A tool that can be called by the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. Returning `Err` is reserved for conditions the
    /// dispatcher should treat as a dispatch failure rather than a tool
    /// result the LLM should see — most failures should instead be encoded
    /// as `ToolResult::failure` content, same as the teacher's tools do.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
