//! The top-level ReAct engine: owns one run's cancellation token and event
//! sequencing, drives [`super::runtime`], and is the single call site that
//! turns a [`TaskState`] into a [`TaskResult`] and emits the terminal event.
//!
//! Centralizing finalize here (rather than in `runtime::run`) is what makes
//! the "exactly one `workflow.result.final` with `stream_finished=true` per
//! run" invariant (spec §5) checkable by inspection: there is exactly one
//! place that constructs a `TaskResult`, and exactly one place that emits
//! the terminal event, guarded by a one-shot latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::events::{AgentLevel, Event, EventHeaderFactory, NoopEventListener};
use crate::core::services::{Services, SharedEventListener, WorkflowTracker};
use crate::core::types::{StopReason, TaskResult, TaskState};
use crate::error::Error;

use super::catalog;
use super::runtime::{self, IterationOutcome};
use super::summarizer::FinalAnswerSummarizer;
use super::workflow::{WorkflowRecorder, FINALIZE_NODE};

/// A run that ended in error still has partial progress worth returning —
/// the caller gets both the underlying cause and the (error) `TaskResult`
/// built from whatever state existed at the point of failure.
#[derive(Debug)]
pub struct RunError {
    pub source: Error,
    pub result: TaskResult,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// One-shot "first caller wins" latch backing the single-terminal-event
/// invariant. Cheap enough to allocate per run; an `AtomicBool` rather than
/// a plain `bool` because the summarizer's streaming path and the engine's
/// direct-finalize path both hold a reference to the same guard and must
/// never both win.
pub(crate) struct TerminalGuard(AtomicBool);

impl TerminalGuard {
    pub(crate) fn new() -> Self {
        TerminalGuard(AtomicBool::new(false))
    }

    /// Returns true the first time it's called, false on every call after.
    pub(crate) fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Builds the final answer text and resolved attachments from whatever state
/// the run reached, per spec §4.5's finalize contract. Pure — does not
/// touch the event stream.
pub(crate) fn finalize(state: &TaskState, stop_reason: StopReason, duration: Duration) -> TaskResult {
    let raw = state
        .final_answer
        .clone()
        .filter(|a| !a.trim().is_empty())
        .or_else(|| {
            state
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::core::types::Role::Assistant)
                .map(|m| m.content.clone())
        })
        .unwrap_or_default();

    let (answer, attachments) = catalog::ensure_attachment_placeholders(raw.trim(), state);

    TaskResult {
        answer,
        messages: state.messages.clone(),
        iterations: state.iterations,
        tokens_used: state.usage,
        stop_reason,
        duration,
        session_id: state.session_id.clone(),
        task_id: state.task_id.clone(),
        attachments,
    }
}

/// Builds the `TaskResult` via [`finalize`] and records `FINALIZE_NODE`
/// (spec §6's stable id for the finalize step) against the injected
/// tracker. The one call site per run that turns state into a result is
/// also the one call site that closes out the finalize node's bookkeeping.
pub(crate) async fn finalize_and_record(
    state: &TaskState,
    stop_reason: StopReason,
    duration: Duration,
    workflow_tracker: &Arc<dyn WorkflowTracker>,
) -> TaskResult {
    let recorder = WorkflowRecorder::new(workflow_tracker.clone());
    recorder
        .start(FINALIZE_NODE, Some(serde_json::json!({"stop_reason": format!("{:?}", stop_reason)})))
        .await;
    let result = finalize(state, stop_reason, duration);
    recorder
        .succeed(FINALIZE_NODE, Some(serde_json::json!({"answer_len": result.answer.len()})))
        .await;
    result
}

/// Emit the terminal `workflow.result.final` event exactly once, guarded by
/// `guard`. Safe to call redundantly — every caller after the first is a
/// no-op.
pub(crate) fn emit_terminal(
    guard: &TerminalGuard,
    header_factory: &EventHeaderFactory,
    listener: &SharedEventListener,
    result: &TaskResult,
    streaming: bool,
) {
    if !guard.claim() {
        return;
    }
    listener.on_event(&Event::ResultFinal {
        base: header_factory.header(None),
        final_answer: result.answer.clone(),
        total_iterations: result.iterations,
        total_tokens: result.tokens_used.total_tokens,
        stop_reason: result.stop_reason,
        duration_ms: result.duration.as_millis() as u64,
        is_streaming: streaming,
        stream_finished: true,
        attachments: result.attachments.clone(),
    });
}

/// The ReAct engine: iteration runtime, attachment catalog, tool dispatcher,
/// and event envelope wired together against one `Services` bundle.
///
/// The event listener is a single-assignment slot — set once at
/// construction via [`ReactEngine::with_listener`], never reassigned, so
/// there's never a question of which listener a given run's events went to.
pub struct ReactEngine {
    config: EngineConfig,
    services: Services,
    listener: SharedEventListener,
    summarizer: Option<FinalAnswerSummarizer>,
}

impl ReactEngine {
    pub fn new(config: EngineConfig, services: Services) -> Self {
        ReactEngine {
            config,
            services,
            listener: Arc::new(NoopEventListener),
            summarizer: None,
        }
    }

    pub fn with_listener(mut self, listener: SharedEventListener) -> Self {
        self.listener = listener;
        self
    }

    /// Enable the final-answer summarizer. Only consulted on runs that end
    /// in `FinalAnswer`, `MaxIterations`, or `PlannedStepsComplete` — a
    /// cancelled or errored run's terminal event always carries the raw
    /// in-progress answer untouched.
    pub fn with_summarizer(mut self, summarizer: FinalAnswerSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Drive one full ReAct run to completion, cancellation, or failure.
    pub async fn run(
        &self,
        task: &str,
        mut state: TaskState,
        cancellation: CancellationToken,
    ) -> Result<TaskResult, RunError> {
        let started = Instant::now();
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let mut header_factory = EventHeaderFactory::new(state.session_id.clone(), run_id);
        header_factory.agent_level = AgentLevel::Core;
        let header_factory = Arc::new(header_factory);

        self.listener.on_event(&Event::InputReceived {
            base: header_factory.header(None),
            task: task.to_string(),
            attachments: state.attachments.clone(),
        });

        if cancellation.is_cancelled() {
            let result =
                finalize_and_record(&state, StopReason::Cancelled, started.elapsed(), &self.services.workflow_tracker)
                    .await;
            let guard = TerminalGuard::new();
            self.listener.on_event(&Event::ResultCancelled {
                base: header_factory.header(None),
                reason: "cancelled before first iteration".to_string(),
                requested_by: None,
            });
            emit_terminal(&guard, &header_factory, &self.listener, &result, false);
            return Err(RunError { source: Error::Cancelled, result });
        }

        runtime::prepare_run_and_record(&mut state, task, &self.services.workflow_tracker).await;

        let outcome = runtime::run(
            &mut state,
            &self.services,
            &self.config,
            &header_factory,
            &self.listener,
            &cancellation,
        )
        .await;

        let guard = TerminalGuard::new();

        match outcome {
            IterationOutcome::FinalAnswer => {
                let result = finalize_and_record(
                    &state,
                    StopReason::FinalAnswer,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                Ok(self.finish_with_summary(result, &guard, &header_factory).await)
            }
            IterationOutcome::MaxIterations => {
                runtime::recover_from_max_iterations(&mut state, &self.services, &self.config).await;
                let result = finalize_and_record(
                    &state,
                    StopReason::MaxIterations,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                Ok(self.finish_with_summary(result, &guard, &header_factory).await)
            }
            IterationOutcome::AwaitUserInput => {
                let result = finalize_and_record(
                    &state,
                    StopReason::AwaitUserInput,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                Ok(result)
            }
            IterationOutcome::Cancelled => {
                let result = finalize_and_record(
                    &state,
                    StopReason::Cancelled,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                self.listener.on_event(&Event::ResultCancelled {
                    base: header_factory.header(None),
                    reason: "cancellation observed mid-run".to_string(),
                    requested_by: None,
                });
                emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                Err(RunError { source: Error::Cancelled, result })
            }
            IterationOutcome::Failed(err) => {
                let result = finalize_and_record(
                    &state,
                    StopReason::Error,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                Err(RunError { source: err, result })
            }
        }
    }

    async fn finish_with_summary(
        &self,
        result: TaskResult,
        guard: &TerminalGuard,
        header_factory: &Arc<EventHeaderFactory>,
    ) -> TaskResult {
        match &self.summarizer {
            Some(summarizer) => {
                summarizer
                    .summarize_and_emit(result, &self.services, guard, header_factory, &self.listener)
                    .await
            }
            None => {
                emit_terminal(guard, header_factory, &self.listener, &result, false);
                result
            }
        }
    }
}
