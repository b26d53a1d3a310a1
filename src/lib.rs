//! # react-engine
//!
//! The execution core of an LLM agent: given a task, an injected `Services`
//! bundle (LLM client, tool registry, parser, context manager, workflow
//! tracker), and a registry of callable tools, this crate drives a
//! Think -> Plan -> Act -> Observe loop (the ReAct loop) until the model
//! produces a terminal answer, an iteration budget is hit, or the run is
//! cancelled.
//!
//! ## Architecture
//!
//! - **`core`**: the data model (`Message`, `ToolCall`, `Attachment`,
//!   `TaskState`, ...), the event envelope (`Event`/`BaseEvent`), and the
//!   injected collaborator traits (`LlmClient`, `FunctionCallParser`,
//!   `ContextManager`, `WorkflowTracker`) bundled as `Services`.
//! - **`engine`**: the attachment catalog, the tool batch dispatcher, the
//!   iteration runtime (the state machine itself), the top-level
//!   `ReactEngine`, the planned-execution driver, and the final-answer
//!   summarizer.
//! - **`tools`**: the `Tool` trait and `ToolRegistry` individual tool
//!   implementations plug into. Concrete tools (file IO, shell, web search,
//!   ...) are out of scope for this crate.
//! - **`config`**: `EngineConfig`, the in-process knobs an embedding
//!   application sets when constructing a `ReactEngine`. No file/env loading
//!   lives here — that's the embedding application's concern.
//!
//! ## Non-goals
//!
//! The LLM client's HTTP/provider framing, concrete tool implementations,
//! session persistence/history stores/cost tracking, prompt-template
//! loading, and the planner subsystem's internals (only its contract with
//! the engine) are all out of scope — see `SPEC_FULL.md`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use react_engine::{EngineConfig, ReactEngine, Services, TaskState};
//! use react_engine::tools::ToolRegistry;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(llm_client: Arc<dyn react_engine::core::LlmClient>) {
//! let services = Services::new(llm_client, Arc::new(ToolRegistry::new()));
//! let engine = ReactEngine::new(EngineConfig::default(), services);
//! let state = TaskState::new("session-1", "task-1");
//! let result = engine
//!     .run("What is the capital of France?", state, CancellationToken::new())
//!     .await;
//! let _ = result;
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod tools;

pub use config::EngineConfig;
pub use error::{Error, Result};

pub use core::{
    Attachment, BaseEvent, CompletionRequest, CompletionResponse, Event, EventListener,
    GenerationOptions, Message, MessageSource, Role, Services, StopReason, TaskResult, TaskState,
    ToolCall, ToolDefinition, ToolResult,
};
pub use engine::{FinalAnswerSummarizer, PlannedExecutionDriver, ReactEngine, RunError};
pub use tools::{Tool, ToolContext, ToolOutput, ToolRegistry};

/// Crate version, from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, from `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
