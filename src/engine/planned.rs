//! Planned execution driver (spec §4.4): an alternate entry point that fans
//! the ReAct loop over a pre-computed, externally supplied step list instead
//! of letting the model decide iteration-by-iteration when it's done.
//!
//! Grounded in the teacher's `PlannerWorkerReflector` (`agent/state_machine.rs`):
//! an explicit state enum drives a loop with preconditioned transitions. This
//! driver keeps that shape but generalizes "plan once, execute steps, reflect
//! once" into "run one bounded ReAct sub-loop per externally supplied step",
//! per the spec's contract — the planner subsystem that produces the step
//! list itself stays out of scope (spec §1 non-goals); this module only
//! implements the engine's side of the contract.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::events::{AgentLevel, Event, EventHeaderFactory, NoopEventListener};
use crate::core::services::{Services, SharedEventListener};
use crate::core::types::{Message, MessageSource, Role, StopReason, TaskResult, TaskState};

use super::react::{emit_terminal, finalize_and_record, RunError, TerminalGuard};
use super::runtime::{self, IterationOutcome, StepContext};
use super::summarizer::FinalAnswerSummarizer;

const MAX_STEP_LEN: usize = 48;
const DEFAULT_SUMMARY_STEP: &str = "总结 / summary";

/// Trim, dedupe, and cap each step at [`MAX_STEP_LEN`] characters; if the
/// resulting list is empty, inject [`DEFAULT_SUMMARY_STEP`] as the sole
/// (terminal) step so the driver always has at least one step to run.
pub fn normalize_steps(steps: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for step in steps {
        let trimmed = step.trim();
        if trimmed.is_empty() {
            continue;
        }
        let capped: String = trimmed.chars().take(MAX_STEP_LEN).collect();
        if seen.insert(capped.clone()) {
            out.push(capped);
        }
    }
    if out.is_empty() {
        out.push(DEFAULT_SUMMARY_STEP.to_string());
    }
    out
}

fn step_prompt(index: usize, total: usize, description: &str) -> String {
    format!(
        "Step {}/{}: {}; only complete this; call tools as needed; finish with a one-sentence result",
        index + 1,
        total,
        description
    )
}

/// Alternate entry point over [`ReactEngine`](super::react::ReactEngine):
/// same `Services`/`EngineConfig`/event envelope, but driven by a
/// pre-computed ordered step list rather than letting the model decide
/// iteration-by-iteration when the task is complete.
pub struct PlannedExecutionDriver {
    config: EngineConfig,
    services: Services,
    listener: SharedEventListener,
    summarizer: Option<FinalAnswerSummarizer>,
}

impl PlannedExecutionDriver {
    pub fn new(config: EngineConfig, services: Services) -> Self {
        PlannedExecutionDriver {
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

    pub fn with_summarizer(mut self, summarizer: FinalAnswerSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Run the task against a pre-computed step list. Every non-terminal
    /// step (all but the last) is turned into a bounded ReAct sub-loop over
    /// the shared `state`/conversation; the terminal step is not itself
    /// re-run through the loop — it marks where the driver stops and
    /// finalizes with `stop_reason = planned_steps_complete`.
    pub async fn run(
        &self,
        task: &str,
        mut state: TaskState,
        steps: Vec<String>,
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

        let steps = normalize_steps(steps);
        self.listener.on_event(&Event::PlanCreated {
            base: header_factory.header(None),
            steps: steps.clone(),
        });

        let guard = TerminalGuard::new();

        if cancellation.is_cancelled() {
            let result =
                finalize_and_record(&state, StopReason::Cancelled, started.elapsed(), &self.services.workflow_tracker)
                    .await;
            self.listener.on_event(&Event::ResultCancelled {
                base: header_factory.header(None),
                reason: "cancelled before first step".to_string(),
                requested_by: None,
            });
            emit_terminal(&guard, &header_factory, &self.listener, &result, false);
            return Err(RunError { source: crate::error::Error::Cancelled, result });
        }

        runtime::prepare_run_and_record(&mut state, task, &self.services.workflow_tracker).await;

        let total = steps.len();
        // All but the last step are "non-terminal" and get a ReAct sub-loop;
        // a single-step list has none (the sole step is the terminal one).
        let non_terminal_count = total.saturating_sub(1);

        for (index, description) in steps.iter().take(non_terminal_count).enumerate() {
            if cancellation.is_cancelled() {
                let result = finalize_and_record(
                    &state,
                    StopReason::Cancelled,
                    started.elapsed(),
                    &self.services.workflow_tracker,
                )
                .await;
                self.listener.on_event(&Event::ResultCancelled {
                    base: header_factory.header(None),
                    reason: "cancellation observed mid-plan".to_string(),
                    requested_by: None,
                });
                emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                return Err(RunError { source: crate::error::Error::Cancelled, result });
            }

            let node_id = format!("react:plan:step:{}", index);
            self.services.workflow_tracker.ensure_node(&node_id, None).await;
            self.services.workflow_tracker.start_node(&node_id).await;

            state.messages.push(
                Message::user(step_prompt(index, total, description)).with_source(MessageSource::UserInput),
            );

            let step_context = StepContext { index, description: description.clone() };
            let outcome = runtime::run_with_step_context(
                &mut state,
                &self.services,
                &self.config,
                &header_factory,
                &self.listener,
                &cancellation,
                Some(step_context),
            )
            .await;

            match outcome {
                IterationOutcome::FinalAnswer => {
                    self.services
                        .workflow_tracker
                        .complete_success(&node_id, Some(serde_json::json!({"step": index})))
                        .await;
                }
                IterationOutcome::AwaitUserInput => {
                    self.services.workflow_tracker.complete_success(&node_id, None).await;
                    let result = finalize_and_record(
                        &state,
                        StopReason::AwaitUserInput,
                        started.elapsed(),
                        &self.services.workflow_tracker,
                    )
                    .await;
                    emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                    return Ok(result);
                }
                IterationOutcome::MaxIterations => {
                    self.services.workflow_tracker.complete_success(&node_id, None).await;
                    runtime::recover_from_max_iterations(&mut state, &self.services, &self.config).await;
                    let result = finalize_and_record(
                        &state,
                        StopReason::MaxIterations,
                        started.elapsed(),
                        &self.services.workflow_tracker,
                    )
                    .await;
                    return Ok(self.finish_with_summary(result, &guard, &header_factory).await);
                }
                IterationOutcome::Cancelled => {
                    self.services.workflow_tracker.complete_failure(&node_id, "cancelled").await;
                    let result = finalize_and_record(
                        &state,
                        StopReason::Cancelled,
                        started.elapsed(),
                        &self.services.workflow_tracker,
                    )
                    .await;
                    self.listener.on_event(&Event::ResultCancelled {
                        base: header_factory.header(None),
                        reason: "cancellation observed mid-step".to_string(),
                        requested_by: None,
                    });
                    emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                    return Err(RunError { source: crate::error::Error::Cancelled, result });
                }
                IterationOutcome::Failed(err) => {
                    self.services.workflow_tracker.complete_failure(&node_id, &err.to_string()).await;
                    let result = finalize_and_record(
                        &state,
                        StopReason::Error,
                        started.elapsed(),
                        &self.services.workflow_tracker,
                    )
                    .await;
                    emit_terminal(&guard, &header_factory, &self.listener, &result, false);
                    return Err(RunError { source: err, result });
                }
            }

            // After the penultimate step (the last non-terminal one), make
            // sure there is *some* answer even if this step's sub-loop
            // somehow ended without setting one.
            if index + 1 == non_terminal_count && state.final_answer.as_deref().unwrap_or("").trim().is_empty() {
                if let Some(last_assistant) =
                    state.messages.iter().rev().find(|m| m.role == Role::Assistant)
                {
                    state.final_answer = Some(last_assistant.content.clone());
                }
            }
        }

        let result = finalize_and_record(
            &state,
            StopReason::PlannedStepsComplete,
            started.elapsed(),
            &self.services.workflow_tracker,
        )
        .await;
        Ok(self.finish_with_summary(result, &guard, &header_factory).await)
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


#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::core::types::{CompletionRequest, CompletionResponse};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlm {
        responses: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl crate::core::services::LlmClient for ScriptedLlm {
        async fn complete(&self, _request: CompletionRequest) -> crate::error::Result<CompletionResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = if responses.is_empty() {
                String::new()
            } else {
                responses.remove(0)
            };
            Ok(CompletionResponse {
                content,
                tool_calls: Vec::new(),
                stop_reason: None,
                usage: None,
                metadata: Default::default(),
            })
        }
    }

    #[tokio::test]
    async fn single_step_list_runs_only_the_terminal_step() {
        let services = Services::new(
            Arc::new(ScriptedLlm { responses: StdMutex::new(vec!["done".to_string()]) }),
            Arc::new(ToolRegistry::new()),
        );
        let driver = PlannedExecutionDriver::new(EngineConfig::default().without_gates(), services);
        let state = TaskState::new("s1", "t1");

        let result = driver
            .run("do the thing", state, vec!["总结".to_string()], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.iterations, 0);
        assert!(matches!(result.stop_reason, StopReason::PlannedStepsComplete));
    }

    #[tokio::test]
    async fn multi_step_plan_runs_each_non_terminal_step_and_completes() {
        let services = Services::new(
            Arc::new(ScriptedLlm {
                responses: StdMutex::new(vec!["step one done".to_string(), "step two done".to_string()]),
            }),
            Arc::new(ToolRegistry::new()),
        );
        let driver = PlannedExecutionDriver::new(EngineConfig::default().without_gates(), services);
        let state = TaskState::new("s1", "t1");

        let result = driver
            .run(
                "research and report",
                state,
                vec!["find sources".to_string(), "write report".to_string(), "summary".to_string()],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.iterations, 2);
        assert!(matches!(result.stop_reason, StopReason::PlannedStepsComplete));
        assert_eq!(result.answer, "step two done");
    }
}
