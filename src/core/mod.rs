//! Core module — data model, event envelope, and injected collaborator
//! traits ("Services bundle"). Nothing in here runs the ReAct loop itself;
//! see `crate::engine` for that.

pub mod events;
pub mod services;
pub mod types;

pub use events::{AgentLevel, BaseEvent, Event, EventListener, EventHeaderFactory, NoopEventListener, SequenceGenerator, ToolCallView};
pub use services::{
    ContentDeltaCallback, ContextManager, FunctionCallParser, HeuristicContextManager, LlmClient,
    NoopFunctionCallParser, NoopWorkflowTracker, Services, WorkflowTracker,
};
pub use types::{
    Attachment, CompletionRequest, CompletionResponse, GenerationOptions, Message, MessageSource,
    Role, StopReason, TaskResult, TaskState, ToolCall, ToolDefinition, ToolResult, Usage,
};
