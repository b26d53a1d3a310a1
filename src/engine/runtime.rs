//! Iteration runtime: the think → plan → (gate) → tools → observe → finish
//! state machine driven once per iteration by the ReAct engine.
//!
//! Grounded in the teacher's (deprecated) `run_agentic_loop` for the overall
//! iterate/think/parse/execute/observe shape, generalized per spec §4.3 with
//! the orchestrator gates the teacher's `state_machine.rs`
//! `PlannerWorkerReflector` pioneers as explicit preconditioned state
//! transitions (plan/clarify before any action tool).

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::events::{Event, EventHeaderFactory, ToolCallView};
use crate::core::services::{SharedEventListener, Services, WorkflowTracker};
use crate::core::types::{
    CompletionRequest, Message, MessageSource, TaskState, ToolCall,
};
use crate::error::Error;

use super::catalog;
use super::dispatcher;
use super::formatters;
use super::workflow::{NodeIds, WorkflowRecorder, CONTEXT_NODE};

/// Leaked-format markers that disqualify a parsed tool call (§4.3 step 5).
const LEAK_MARKERS: [&str; 3] = ["<|", "functions.", "user<"];

const PLAN_TOOL: &str = "plan";
const CLARIFY_TOOL: &str = "clarify";

fn has_leaked_marker(name: &str) -> bool {
    LEAK_MARKERS.iter().any(|m| name.contains(m))
}

/// Step identity threaded through a `run` invocation driven by the planned
/// execution driver (§4.4), so every `workflow.node.started` event emitted
/// while working on one externally supplied step carries its index/text.
/// `None` for a plain top-level `ReactEngine::run`.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub index: usize,
    pub description: String,
}

/// How one `run` invocation of the iteration runtime ended. The caller
/// (the top-level ReAct engine, or the planned-execution driver for one
/// step) is responsible for turning this into a `TaskResult` via finalize —
/// the runtime itself never constructs one, so the single-terminal-event
/// guard has exactly one call site per run.
#[derive(Debug)]
pub enum IterationOutcome {
    FinalAnswer,
    MaxIterations,
    AwaitUserInput,
    Cancelled,
    Failed(Error),
}

/// Precondition-tracked orchestrator state, scoped to one run.
#[derive(Debug, Default)]
struct OrchestratorState {
    plan_emitted: bool,
    clarified_task_ids: HashSet<String>,
    pending_clarify_task_id: Option<String>,
    awaiting_user_input: bool,
}

impl OrchestratorState {
    fn is_clarified(&self, task_id: &str) -> bool {
        self.clarified_task_ids.contains(task_id)
    }
}

/// Entry preconditions shared by the top-level engine and the planned
/// execution driver: fold existing attachments, keep the system prompt
/// pinned as the first message, and append the new user input.
pub fn prepare_run(state: &mut TaskState, task: &str) {
    for msg in state.messages.clone().iter() {
        catalog::register_from_message(state, msg);
    }

    if !state.system_prompt.trim().is_empty() {
        let has_system = state
            .messages
            .first()
            .map(|m| m.source == Some(MessageSource::SystemPrompt))
            .unwrap_or(false);
        if has_system {
            if state.messages[0].content != state.system_prompt {
                state.messages[0].content = state.system_prompt.clone();
            }
        } else {
            state.messages.insert(
                0,
                Message::system(state.system_prompt.clone()).with_source(MessageSource::SystemPrompt),
            );
        }
    }

    let pending = std::mem::take(&mut state.pending_user_attachments);
    let mut user_msg = Message::user(task).with_source(MessageSource::UserInput);
    if !pending.is_empty() {
        for (name, att) in pending.iter() {
            state.attachments.insert(name.clone(), att.clone());
            state.attachment_iterations.insert(name.clone(), state.iterations);
        }
        user_msg = user_msg.with_attachments(pending);
    }
    state.messages.push(user_msg);
}

/// Same as [`prepare_run`], but records `CONTEXT_NODE` (spec §6's stable id
/// for the run-wide context/precondition step) against the injected tracker.
pub async fn prepare_run_and_record(state: &mut TaskState, task: &str, workflow_tracker: &Arc<dyn WorkflowTracker>) {
    let recorder = WorkflowRecorder::new(workflow_tracker.clone());
    recorder.start(CONTEXT_NODE, Some(serde_json::json!({"task": task}))).await;
    prepare_run(state, task);
    recorder
        .succeed(CONTEXT_NODE, Some(serde_json::json!({"message_count": state.messages.len()})))
        .await;
}

fn build_completion_request(state: &TaskState, services: &Services, config: &EngineConfig) -> CompletionRequest {
    CompletionRequest {
        messages: state.messages.clone(),
        tools: services.tools.definitions(),
        options: config.generation_options.clone(),
        metadata: Default::default(),
    }
}

/// Run iterations against an already-`prepare_run`-ed `state` until a
/// terminal outcome. Does not finalize — see [`IterationOutcome`].
#[allow(clippy::too_many_arguments)]
pub async fn run(
    state: &mut TaskState,
    services: &Services,
    config: &EngineConfig,
    header_factory: &EventHeaderFactory,
    listener: &SharedEventListener,
    cancellation: &CancellationToken,
) -> IterationOutcome {
    run_with_step_context(state, services, config, header_factory, listener, cancellation, None).await
}

/// Same as [`run`], but every `NodeStarted` event carries `step_context`'s
/// index/description — used by the planned execution driver to drive one
/// bounded sub-loop per externally supplied step while preserving every
/// invariant a plain top-level run has.
#[allow(clippy::too_many_arguments)]
pub async fn run_with_step_context(
    state: &mut TaskState,
    services: &Services,
    config: &EngineConfig,
    header_factory: &EventHeaderFactory,
    listener: &SharedEventListener,
    cancellation: &CancellationToken,
    step_context: Option<StepContext>,
) -> IterationOutcome {
    let recorder = WorkflowRecorder::new(services.workflow_tracker.clone());
    let mut orchestrator = OrchestratorState::default();

    loop {
        if cancellation.is_cancelled() {
            return IterationOutcome::Cancelled;
        }
        if state.iterations >= config.max_iterations {
            break;
        }

        state.iterations += 1;
        let i = state.iterations;

        listener.on_event(&Event::NodeStarted {
            base: header_factory.header(None),
            iteration: i,
            total_iters: config.max_iterations,
            step_index: step_context.as_ref().map(|s| s.index),
            step_description: step_context.as_ref().map(|s| s.description.clone()),
        });

        // --- Think -----------------------------------------------------
        let think_node = NodeIds::think(i);
        recorder.start(&think_node, None).await;

        let request = build_completion_request(state, services, config);
        let response = match services.llm_client.complete(request).await {
            Ok(r) => r,
            Err(e) => {
                let msg = format!("think step failed: {e}");
                recorder.fail(&think_node, &msg).await;
                listener.on_event(&Event::NodeFailed {
                    base: header_factory.header(None),
                    iteration: i,
                    phase: "think".to_string(),
                    error: msg.clone(),
                    recoverable: false,
                });
                return IterationOutcome::Failed(Error::Llm(msg));
            }
        };
        recorder
            .succeed(&think_node, Some(serde_json::json!({"tool_calls": response.tool_calls.len()})))
            .await;
        if let Some(usage) = &response.usage {
            state.usage.accumulate(usage);
        }

        let assistant_msg = formatters::assistant_message_with_resolved_attachments(response.content.clone(), state);
        catalog::register_from_message(state, &assistant_msg);
        state.messages.push(assistant_msg);

        listener.on_event(&Event::NodeOutputDelta {
            base: header_factory.header(None),
            iteration: i,
            message_count: state.messages.len(),
        });

        listener.on_event(&Event::NodeOutputSummary {
            base: header_factory.header(None),
            iteration: i,
            content: response.content.clone(),
            tool_call_count: response.tool_calls.len(),
        });

        // --- Parse -------------------------------------------------------
        let mut tool_calls: Vec<ToolCall> = if !response.tool_calls.is_empty() {
            response.tool_calls.clone()
        } else if !response.content.trim().is_empty() {
            match services.parser.parse(&response.content) {
                Ok(calls) => calls,
                Err(e) => {
                    warn!(error = %e, "function call parser failed; continuing with zero calls");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        // --- Filter --------------------------------------------------------
        let before = tool_calls.len();
        tool_calls.retain(|c| !has_leaked_marker(&c.name));
        if tool_calls.len() != before {
            debug!(iteration = i, dropped = before - tool_calls.len(), "filtered leaked tool call markers");
        }

        // --- Plan node -----------------------------------------------------
        let plan_node = NodeIds::plan(i);
        recorder
            .record_instant_success(
                &plan_node,
                None,
                Some(serde_json::json!({
                    "tool_call_count": tool_calls.len(),
                    "tool_names": tool_calls.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
                })),
            )
            .await;

        // --- No-tool short-circuit -----------------------------------------
        if tool_calls.is_empty() {
            if !response.content.trim().is_empty() {
                state.final_answer = Some(response.content.clone());
                finish_iteration(state, services, header_factory, listener, i, 0, "final_answer").await;
                return IterationOutcome::FinalAnswer;
            }
            finish_iteration(state, services, header_factory, listener, i, 0, "empty").await;
            continue;
        }

        // --- Orchestrator gates ----------------------------------------
        if tool_calls.len() > 1 {
            state.messages.push(Message::system("only one tool call per iteration"));
            finish_iteration(state, services, header_factory, listener, i, 0, "gated_multi_call").await;
            continue;
        }

        let call = tool_calls.into_iter().next().unwrap();
        let is_plan_or_clarify = call.name == PLAN_TOOL || call.name == CLARIFY_TOOL;

        if !is_plan_or_clarify && config.require_plan_gate && !orchestrator.plan_emitted {
            state.messages.push(Message::system(
                "call the plan tool before taking any action, to lay out your approach first",
            ));
            finish_iteration(state, services, header_factory, listener, i, 0, "gated_plan").await;
            continue;
        }
        if !is_plan_or_clarify
            && config.require_clarify_gate
            && !orchestrator.is_clarified(&state.task_id)
        {
            orchestrator.pending_clarify_task_id = Some(state.task_id.clone());
            state.messages.push(Message::system(
                "call the clarify tool to confirm your understanding of the task before acting",
            ));
            finish_iteration(state, services, header_factory, listener, i, 0, "gated_clarify").await;
            continue;
        }

        // --- Execute ---------------------------------------------------
        let calls = vec![call];
        for c in &calls {
            listener.on_event(&Event::ToolStarted {
                base: header_factory.header(Some(c.id.clone())),
                iteration: i,
                call: ToolCallView {
                    call_id: c.id.clone(),
                    tool_name: c.name.clone(),
                    arguments: c.arguments.clone(),
                },
            });
        }

        let tools_node = NodeIds::tools(i);
        recorder.start(&tools_node, Some(serde_json::json!({"call_count": calls.len()}))).await;
        let (results, _attachments_changed) =
            dispatcher::dispatch_batch(&calls, state, i, services, header_factory, listener, config.tool_concurrency).await;
        recorder.succeed(&tools_node, Some(serde_json::json!({"result_count": results.len()}))).await;

        // --- Observe -----------------------------------------------------
        let diff_line = formatters::summarize_world_diff(&results);
        if !diff_line.is_empty() {
            state.world_diff.push(diff_line);
        }
        for r in &results {
            if let Some(signal) = formatters::extract_feedback_signal(r) {
                state.feedback_signals.push(signal);
            }
        }

        let mut catalog_changed = false;
        for result in &results {
            let msg = formatters::build_tool_message(result, state);
            catalog_changed |= catalog::register_from_message(state, &msg);
            state.messages.push(msg);
        }
        state.tool_results.extend(results.clone());

        if catalog_changed {
            catalog::update_catalog_message(state);
        }

        // --- Orchestrator state update -----------------------------------
        for result in &results {
            if result.is_error() {
                continue;
            }
            let Some(c) = calls.iter().find(|c| c.id == result.call_id) else {
                continue;
            };
            match c.name.as_str() {
                PLAN_TOOL => orchestrator.plan_emitted = true,
                CLARIFY_TOOL => {
                    orchestrator.clarified_task_ids.insert(state.task_id.clone());
                    let needs_user_input = result
                        .metadata
                        .as_ref()
                        .and_then(Value::as_object)
                        .and_then(|m| m.get("needs_user_input"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if needs_user_input {
                        orchestrator.awaiting_user_input = true;
                    }
                }
                _ => {}
            }
        }

        // --- Finish --------------------------------------------------------
        finish_iteration(state, services, header_factory, listener, i, results.len(), "completed").await;

        // --- Pause -----------------------------------------------------
        if orchestrator.awaiting_user_input {
            return IterationOutcome::AwaitUserInput;
        }
    }

    IterationOutcome::MaxIterations
}

async fn finish_iteration(
    state: &mut TaskState,
    services: &Services,
    header_factory: &EventHeaderFactory,
    listener: &SharedEventListener,
    iteration: u32,
    tools_run: usize,
    status: &str,
) {
    state.token_count = services.context_manager.estimate_tokens(&state.messages);
    listener.on_event(&Event::NodeCompleted {
        base: header_factory.header(None),
        iteration,
        tokens_used: state.token_count,
        tools_run,
        status: status.to_string(),
    });
    info!(iteration, tokens = state.token_count, tools_run, status, "iteration finished");
}

/// Max-iteration recovery (spec §4.3 "Loop exit"): if the run hit the
/// iteration budget without a terminal outcome, attempt exactly one more
/// LLM call to coax out a final answer before giving up.
pub async fn recover_from_max_iterations(
    state: &mut TaskState,
    services: &Services,
    config: &EngineConfig,
) {
    if state.final_answer.as_deref().unwrap_or("").trim().is_empty() {
        state.messages.push(Message::user("Please provide your final answer now"));
        let request = build_completion_request(state, services, config);
        if let Ok(response) = services.llm_client.complete(request).await {
            if let Some(usage) = &response.usage {
                state.usage.accumulate(usage);
            }
            if !response.content.trim().is_empty() {
                state.final_answer = Some(response.content.clone());
                let assistant_msg =
                    formatters::assistant_message_with_resolved_attachments(response.content, state);
                state.messages.push(assistant_msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{MessageSource, TaskState};

    #[test]
    fn has_leaked_marker_detects_all_three_forms() {
        assert!(has_leaked_marker("<|tool|>"));
        assert!(has_leaked_marker("functions.read_file"));
        assert!(has_leaked_marker("user<1>"));
        assert!(!has_leaked_marker("read_file"));
    }

    #[test]
    fn prepare_run_pins_system_prompt_first() {
        let mut state = TaskState::new("s1", "t1");
        state.system_prompt = "be helpful".to_string();
        prepare_run(&mut state, "hello");
        assert_eq!(state.messages[0].source, Some(MessageSource::SystemPrompt));
        assert_eq!(state.messages[0].content, "be helpful");
        assert_eq!(state.messages.last().unwrap().content, "hello");
    }

    #[test]
    fn prepare_run_drains_pending_attachments_into_catalog() {
        let mut state = TaskState::new("s1", "t1");
        state
            .pending_user_attachments
            .insert("up.png".to_string(), crate::core::types::Attachment::new("up.png", "image/png"));
        prepare_run(&mut state, "here is a file");
        assert!(state.attachments.contains_key("up.png"));
        assert!(state.pending_user_attachments.is_empty());
    }
}
