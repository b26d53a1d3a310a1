//! Fundamental data types shared across the engine.
//!
//! Mirrors the shape of `openagent`'s old `agent::types` module but
//! generalizes it from a single OpenRouter wire format into the
//! collaborator-agnostic model the ReAct engine is built around.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Provenance tag carried on a message, used by the context manager and by
/// the runtime to decide ordering/placement rules (e.g. keeping a
/// `user_history` summary ahead of the live user-input message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    SystemPrompt,
    UserInput,
    UserHistory,
    AssistantReply,
    ToolResult,
    Debug,
    Evaluation,
    ImportantNotice,
}

/// A message in the growing task conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the assistant in this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// When `role == Tool`, the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MessageSource>,
    /// Attachments carried by this message, keyed by placeholder name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attachments: HashMap<String, Attachment>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.source = Some(MessageSource::ToolResult);
        msg
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            source: None,
            attachments: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_attachments(mut self, attachments: HashMap<String, Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// True when this message carries the attachment-catalog refresher flag.
    pub fn is_attachment_catalog_message(&self) -> bool {
        self.metadata
            .get("attachment_catalog")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A tool-call request, either produced natively by the LLM or recovered by
/// the injected `FunctionCallParser` from freeform assistant content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as an unordered JSON object; nested lists/objects are legal.
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
            session_id: None,
            task_id: None,
            parent_task_id: None,
        }
    }

    /// Stamp correlation ids inherited from the owning task, filling only
    /// fields that are currently unset.
    pub fn stamp_correlation(&mut self, session_id: &str, task_id: &str, parent_task_id: Option<&str>) {
        if self.session_id.is_none() {
            self.session_id = Some(session_id.to_string());
        }
        if self.task_id.is_none() {
            self.task_id = Some(task_id.to_string());
        }
        if self.parent_task_id.is_none() {
            self.parent_task_id = parent_task_id.map(|s| s.to_string());
        }
    }
}

/// The observed result of executing one `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attachments: HashMap<String, Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ToolResult {
            call_id: call_id.into(),
            content: content.into(),
            error: None,
            metadata: None,
            attachments: HashMap::new(),
            session_id: None,
            task_id: None,
            parent_task_id: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        ToolResult {
            call_id: call_id.into(),
            content: String::new(),
            error: Some(error),
            metadata: None,
            attachments: HashMap::new(),
            session_id: None,
            task_id: None,
            parent_task_id: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Fill correlation ids from the originating call when the tool didn't set them.
    pub fn fill_correlation_from(&mut self, call: &ToolCall) {
        if self.session_id.is_none() {
            self.session_id = call.session_id.clone();
        }
        if self.task_id.is_none() {
            self.task_id = call.task_id.clone();
        }
        if self.parent_task_id.is_none() {
            self.parent_task_id = call.parent_task_id.clone();
        }
    }
}

/// A binary artifact referenceable by placeholder, e.g. `[diagram.png]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Canonical name, identical to its placeholder form and to its catalog key.
    pub name: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_assets: Option<Vec<String>>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>) -> Self {
        Attachment {
            name: name.into(),
            media_type: media_type.into(),
            data: None,
            uri: None,
            source: None,
            description: None,
            kind: None,
            format: None,
            preview_profile: None,
            preview_assets: None,
        }
    }

    /// Equality used by catalog registration to decide whether an update changed anything.
    pub fn content_eq(&self, other: &Attachment) -> bool {
        self.name == other.name
            && self.media_type == other.media_type
            && self.data == other.data
            && self.uri == other.uri
            && self.source == other.source
            && self.description == other.description
            && self.kind == other.kind
            && self.format == other.format
            && self.preview_profile == other.preview_profile
            && self.preview_assets == other.preview_assets
    }
}

/// Known attachment source tags. Not a closed set — arbitrary tool names are
/// also legal source values — but these are referenced by the alias rules.
pub mod attachment_source {
    pub const USER_UPLOAD: &str = "user_upload";
    pub const SEEDREAM: &str = "seedream";
}

/// Token usage accounting, accumulated across iterations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, delta: &Usage) {
        self.prompt_tokens += delta.prompt_tokens;
        self.completion_tokens += delta.completion_tokens;
        self.total_tokens += delta.total_tokens;
    }
}

/// Generation knobs for a completion request.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

/// JSON-schema tool definition handed to the LLM client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A completion request sent to the injected `LlmClient`.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: GenerationOptions,
    pub metadata: HashMap<String, Value>,
}

/// A completion response returned by the injected `LlmClient`.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
    pub metadata: HashMap<String, Value>,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FinalAnswer,
    MaxIterations,
    Cancelled,
    Error,
    PlannedStepsComplete,
    AwaitUserInput,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::FinalAnswer => "final_answer",
            StopReason::MaxIterations => "max_iterations",
            StopReason::Cancelled => "cancelled",
            StopReason::Error => "error",
            StopReason::PlannedStepsComplete => "planned_steps_complete",
            StopReason::AwaitUserInput => "await_user_input",
        };
        write!(f, "{}", s)
    }
}

/// The mutable per-task record threaded through a run.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub token_count: usize,
    pub tool_results: Vec<ToolResult>,
    pub attachments: HashMap<String, Attachment>,
    pub attachment_iterations: HashMap<String, u32>,
    pub pending_user_attachments: HashMap<String, Attachment>,
    pub session_id: String,
    pub task_id: String,
    pub parent_task_id: Option<String>,
    pub final_answer: Option<String>,
    /// Structured context layers consumed by the context manager; the
    /// engine itself only appends to them, it never interprets their content.
    pub plans: Vec<String>,
    pub beliefs: Vec<String>,
    pub knowledge_refs: Vec<String>,
    pub world_state: HashMap<String, Value>,
    pub world_diff: Vec<String>,
    pub feedback_signals: Vec<Value>,
    /// Persistence-directive notes flagged by tool result metadata (§4.2).
    pub important_notes: Vec<String>,
    /// Token usage accumulated across every `think` completion this run.
    pub usage: Usage,
}

impl TaskState {
    pub fn new(session_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        TaskState {
            system_prompt: String::new(),
            messages: Vec::new(),
            iterations: 0,
            token_count: 0,
            tool_results: Vec::new(),
            attachments: HashMap::new(),
            attachment_iterations: HashMap::new(),
            pending_user_attachments: HashMap::new(),
            session_id: session_id.into(),
            task_id: task_id.into(),
            parent_task_id: None,
            final_answer: None,
            plans: Vec::new(),
            beliefs: Vec::new(),
            knowledge_refs: Vec::new(),
            world_state: HashMap::new(),
            world_diff: Vec::new(),
            feedback_signals: Vec::new(),
            important_notes: Vec::new(),
            usage: Usage::default(),
        }
    }
}

/// The outcome of a finished run.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub answer: String,
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub tokens_used: Usage,
    pub stop_reason: StopReason,
    pub duration: std::time::Duration,
    pub session_id: String,
    pub task_id: String,
    pub attachments: HashMap<String, Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::tool("c1", "ok").tool_call_id, Some("c1".to_string()));
    }

    #[test]
    fn attachment_content_eq_ignores_nothing_but_fields() {
        let a = Attachment::new("x.png", "image/png");
        let mut b = a.clone();
        assert!(a.content_eq(&b));
        b.description = Some("changed".into());
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn stop_reason_display_matches_wire_strings() {
        assert_eq!(StopReason::FinalAnswer.to_string(), "final_answer");
        assert_eq!(StopReason::AwaitUserInput.to_string(), "await_user_input");
    }
}
