//! Event envelope layer.
//!
//! Every lifecycle event carries a shared `BaseEvent` header and is sequenced
//! in strict emission order, per the spec's sum-type redesign note: rather
//! than the teacher's plain `AgentEvent`-per-callback shape, variants share
//! one header struct and are dispatched through a single `Event` enum.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{Attachment, StopReason};

/// Where in an agent hierarchy this run sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLevel {
    Core,
    Subagent,
}

/// Header carried by every emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct BaseEvent {
    pub event_id: String,
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub session_id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub agent_level: AgentLevel,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub log_id: String,
}

/// A tool call as rendered for display in `workflow.tool.started`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallView {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// One concrete lifecycle event, each variant prefixed with its `BaseEvent`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type")]
pub enum Event {
    #[serde(rename = "workflow.input.received")]
    InputReceived {
        base: BaseEvent,
        task: String,
        attachments: HashMap<String, Attachment>,
    },
    #[serde(rename = "workflow.node.started")]
    NodeStarted {
        base: BaseEvent,
        iteration: u32,
        total_iters: u32,
        step_index: Option<usize>,
        step_description: Option<String>,
    },
    #[serde(rename = "workflow.node.output_delta")]
    NodeOutputDelta {
        base: BaseEvent,
        iteration: u32,
        message_count: usize,
    },
    #[serde(rename = "workflow.node.output_summary")]
    NodeOutputSummary {
        base: BaseEvent,
        iteration: u32,
        content: String,
        tool_call_count: usize,
    },
    #[serde(rename = "workflow.node.completed")]
    NodeCompleted {
        base: BaseEvent,
        iteration: u32,
        tokens_used: usize,
        tools_run: usize,
        status: String,
    },
    #[serde(rename = "workflow.node.failed")]
    NodeFailed {
        base: BaseEvent,
        iteration: u32,
        phase: String,
        error: String,
        recoverable: bool,
    },
    #[serde(rename = "workflow.tool.started")]
    ToolStarted {
        base: BaseEvent,
        iteration: u32,
        #[serde(flatten)]
        call: ToolCallView,
    },
    #[serde(rename = "workflow.tool.progress")]
    ToolProgress {
        base: BaseEvent,
        call_id: String,
        chunk: String,
        is_complete: bool,
    },
    #[serde(rename = "workflow.tool.completed")]
    ToolCompleted {
        base: BaseEvent,
        call_id: String,
        tool_name: String,
        result: String,
        error: Option<String>,
        duration_ms: u64,
        metadata: Option<Value>,
        attachments: HashMap<String, Attachment>,
    },
    #[serde(rename = "workflow.result.final")]
    ResultFinal {
        base: BaseEvent,
        final_answer: String,
        total_iterations: u32,
        total_tokens: u32,
        stop_reason: StopReason,
        duration_ms: u64,
        is_streaming: bool,
        stream_finished: bool,
        attachments: HashMap<String, Attachment>,
    },
    #[serde(rename = "workflow.result.cancelled")]
    ResultCancelled {
        base: BaseEvent,
        reason: String,
        requested_by: Option<String>,
    },
    /// Emitted once by the planned-execution driver (§4.4) before it starts
    /// working through a pre-computed step list.
    #[serde(rename = "workflow.plan.created")]
    PlanCreated {
        base: BaseEvent,
        steps: Vec<String>,
    },
}

impl Event {
    pub fn base(&self) -> &BaseEvent {
        match self {
            Event::InputReceived { base, .. }
            | Event::NodeStarted { base, .. }
            | Event::NodeOutputDelta { base, .. }
            | Event::NodeOutputSummary { base, .. }
            | Event::NodeCompleted { base, .. }
            | Event::NodeFailed { base, .. }
            | Event::ToolStarted { base, .. }
            | Event::ToolProgress { base, .. }
            | Event::ToolCompleted { base, .. }
            | Event::ResultFinal { base, .. }
            | Event::ResultCancelled { base, .. }
            | Event::PlanCreated { base, .. } => base,
        }
    }

    /// The stable wire name for this variant, used for dispatch/logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::InputReceived { .. } => "workflow.input.received",
            Event::NodeStarted { .. } => "workflow.node.started",
            Event::NodeOutputDelta { .. } => "workflow.node.output_delta",
            Event::NodeOutputSummary { .. } => "workflow.node.output_summary",
            Event::NodeCompleted { .. } => "workflow.node.completed",
            Event::NodeFailed { .. } => "workflow.node.failed",
            Event::ToolStarted { .. } => "workflow.tool.started",
            Event::ToolProgress { .. } => "workflow.tool.progress",
            Event::ToolCompleted { .. } => "workflow.tool.completed",
            Event::ResultFinal { .. } => "workflow.result.final",
            Event::ResultCancelled { .. } => "workflow.result.cancelled",
            Event::PlanCreated { .. } => "workflow.plan.created",
        }
    }

    /// True for the single event variant that must close out a run exactly once.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::ResultFinal { stream_finished: true, .. })
    }
}

/// Process-wide monotonic sequence counter, one instance per engine run.
///
/// The spec calls out event-id generation as process-wide global state that
/// must be resettable in tests; rather than a single process-global, each
/// run owns its own `SequenceGenerator` so tests never leak sequence state
/// across runs while still guaranteeing monotonic order within a run.
pub struct SequenceGenerator {
    next: AtomicU64,
    run_id: String,
}

impl SequenceGenerator {
    pub fn new(run_id: impl Into<String>) -> Self {
        SequenceGenerator {
            next: AtomicU64::new(0),
            run_id: run_id.into(),
        }
    }

    /// Allocate the next sequence number and a unique event id for it.
    pub fn next(&self) -> (u64, String) {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        (seq, format!("{}-evt-{}", self.run_id, seq))
    }
}

/// Constructs `BaseEvent` headers sharing one run's correlation identity.
pub struct EventHeaderFactory {
    pub sequence: SequenceGenerator,
    pub session_id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub agent_level: AgentLevel,
}

impl EventHeaderFactory {
    pub fn new(session_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        EventHeaderFactory {
            sequence: SequenceGenerator::new(run_id.clone()),
            session_id: session_id.into(),
            run_id,
            parent_run_id: None,
            agent_level: AgentLevel::Core,
        }
    }

    pub fn header(&self, causation_id: Option<String>) -> BaseEvent {
        let (sequence, event_id) = self.sequence.next();
        BaseEvent {
            event_id: event_id.clone(),
            sequence,
            timestamp_ms: super::services::now_ms(),
            session_id: self.session_id.clone(),
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
            agent_level: self.agent_level,
            correlation_id: self.parent_run_id.clone().unwrap_or_else(|| self.run_id.clone()),
            causation_id,
            log_id: event_id,
        }
    }
}

/// Fan-out sink for emitted events. At most one listener is registered per
/// engine instance (single-assignment slot per spec §5); `tool_progress`
/// events may be invoked from worker tasks, so implementations must be
/// `Send + Sync`.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// No-op listener used when the caller doesn't want to observe the run.
pub struct NoopEventListener;
impl EventListener for NoopEventListener {
    fn on_event(&self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let gen = SequenceGenerator::new("run1");
        let (s0, _) = gen.next();
        let (s1, _) = gen.next();
        let (s2, _) = gen.next();
        assert!(s0 < s1 && s1 < s2);
    }

    #[test]
    fn header_factory_stamps_correlation_id_from_run_when_no_parent() {
        let factory = EventHeaderFactory::new("sess", "run1");
        let header = factory.header(None);
        assert_eq!(header.correlation_id, "run1");
        assert_eq!(header.run_id, "run1");
    }
}
