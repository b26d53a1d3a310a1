//! Tool batch dispatcher: runs one iteration's validated tool calls under a
//! bounded worker pool, normalizes their results, and merges attachment
//! side effects back into `TaskState` under a mutex.
//!
//! Grounded in the teacher's `ToolRegistry::execute` (fallible per-call
//! dispatch that never panics), generalized into the pre-sized, positional
//! result-slot pattern the `goose` crate's `reply_loop.rs` uses for parallel
//! tool/message processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::events::{Event, EventHeaderFactory};
use crate::core::services::{SharedEventListener, Services};
use crate::core::types::{Attachment, TaskState, ToolCall, ToolResult};
use crate::tools::{ProgressEmitter, ToolContext};

use super::catalog;

const A2UI_EMIT: &str = "a2ui_emit";

fn workflow_node_id(iteration: u32, call_id: &str) -> String {
    super::workflow::NodeIds::tool(iteration, call_id)
}

fn parse_attachment_entry(value: &Value) -> Option<Attachment> {
    serde_json::from_value(value.clone()).ok()
}

/// Tolerant parse of an attachment collection shaped either as a JSON object
/// keyed by name, or as an array of attachment-like objects carrying `name`.
fn parse_attachment_map(value: &Value) -> HashMap<String, Attachment> {
    let mut out = HashMap::new();
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if let Some(att) = parse_attachment_entry(v) {
                    out.insert(key.clone(), att);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Some(att) = parse_attachment_entry(item) {
                    if !att.name.trim().is_empty() {
                        out.insert(att.name.clone(), att);
                    }
                }
            }
        }
        _ => {}
    }
    out
}

fn parse_name_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// What a tool result's metadata asked for, split into the replace/remove
/// directives and the combined add+update map (per §4.2 step 6).
struct ParsedMutations {
    mutations: catalog::RawMutations,
    add: HashMap<String, Attachment>,
    update: HashMap<String, Attachment>,
}

/// Parse attachment mutations out of a tool result's metadata object.
/// Mutation parse failures are ignored silently; other operations still apply.
fn parse_mutations(metadata: Option<&Value>) -> ParsedMutations {
    let mut mutations = catalog::RawMutations::default();
    let mut add = HashMap::new();
    let mut update = HashMap::new();

    let raw = metadata
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("attachment_mutations").or_else(|| obj.get("attachments_mutations")))
        .and_then(Value::as_object);

    let Some(raw) = raw else {
        return ParsedMutations { mutations, add, update };
    };

    for key in ["replace", "snapshot", "catalog"] {
        if let Some(v) = raw.get(key) {
            mutations.replace = Some(parse_attachment_map(v));
            break;
        }
    }
    for key in ["add", "create"] {
        if let Some(v) = raw.get(key) {
            add.extend(parse_attachment_map(v));
        }
    }
    for key in ["update", "upsert"] {
        if let Some(v) = raw.get(key) {
            update.extend(parse_attachment_map(v));
        }
    }
    for key in ["remove", "delete"] {
        if let Some(v) = raw.get(key) {
            mutations.remove.get_or_insert_with(Vec::new).extend(parse_name_list(v));
        }
    }

    ParsedMutations { mutations, add, update }
}

/// Strips attachments and `attachment_mutations*` metadata keys from a
/// result from the display-only `a2ui_emit` tool (§4.2 step 5).
fn strip_a2ui_emit_fields(tool_name: &str, mut result: ToolResult) -> ToolResult {
    if tool_name != A2UI_EMIT {
        return result;
    }
    result.attachments.clear();
    if let Some(Value::Object(map)) = result.metadata.as_mut() {
        map.retain(|k, _| !k.starts_with("attachment_mutations") && !k.starts_with("attachments_mutations"));
    }
    result
}

/// Attachment-bearing shared state protected by the batch mutex: only the
/// fields §5 calls out as cross-worker mutable (attachments, their iteration
/// stamps) plus the iteration counter needed to stamp new entries.
struct SharedCatalog {
    attachments: HashMap<String, Attachment>,
    attachment_iterations: HashMap<String, u32>,
    iterations: u32,
    important_notes: Vec<String>,
}

impl SharedCatalog {
    fn from_state(state: &TaskState) -> Self {
        SharedCatalog {
            attachments: state.attachments.clone(),
            attachment_iterations: state.attachment_iterations.clone(),
            iterations: state.iterations,
            important_notes: Vec::new(),
        }
    }

    fn write_back(self, state: &mut TaskState) {
        state.attachments = self.attachments;
        state.attachment_iterations = self.attachment_iterations;
        state.important_notes.extend(self.important_notes);
    }

    /// Runs the catalog merge through an ephemeral `TaskState` view so the
    /// shared mutex only ever guards this struct's fields, not the whole
    /// conversation.
    fn merge(&mut self, parsed: &ParsedMutations, tool_name: &str) -> bool {
        let mut view = TaskState::new(String::new(), String::new());
        view.iterations = self.iterations;
        view.attachments = std::mem::take(&mut self.attachments);
        view.attachment_iterations = std::mem::take(&mut self.attachment_iterations);

        let merged = catalog::build_merged_map(&view, &parsed.mutations, parsed.add.clone(), parsed.update.clone());
        let changed = catalog::apply_mutations(&mut view, merged, clone_mutations(&parsed.mutations), tool_name);

        self.attachments = view.attachments;
        self.attachment_iterations = view.attachment_iterations;
        changed
    }
}

fn clone_mutations(m: &catalog::RawMutations) -> catalog::RawMutations {
    catalog::RawMutations {
        replace: m.replace.clone(),
        remove: m.remove.clone(),
    }
}

/// One prepared call, ready for dispatch, plus its original batch position.
struct Prepared {
    index: usize,
    call: ToolCall,
}

/// Run a validated batch of tool calls for iteration `i`, returning results
/// in call order. Attachment side effects are merged into `state` before
/// returning; the returned bool is whether any attachment changed.
pub async fn dispatch_batch(
    calls: &[ToolCall],
    state: &mut TaskState,
    iteration: u32,
    services: &Services,
    header_factory: &EventHeaderFactory,
    listener: &SharedEventListener,
    concurrency: usize,
) -> (Vec<ToolResult>, bool) {
    if calls.is_empty() {
        return (Vec::new(), false);
    }

    let snapshot = state.clone();
    let session_id = state.session_id.clone();
    let task_id = state.task_id.clone();
    let parent_task_id = state.parent_task_id.clone();

    let prepared: Vec<Prepared> = calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            let mut call = call.clone();
            call.stamp_correlation(&session_id, &task_id, parent_task_id.as_deref());
            call.arguments = catalog::expand_placeholders(&call.arguments, &snapshot);
            Prepared { index, call }
        })
        .collect();

    let shared_catalog = Arc::new(Mutex::new(SharedCatalog::from_state(state)));
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let tools = Arc::clone(&services.tools);
    let tracker = Arc::clone(&services.workflow_tracker);
    let snapshot_attachments = snapshot.attachments.clone();
    let snapshot = Arc::new(snapshot);

    let mut join_set: JoinSet<(usize, ToolResult)> = JoinSet::new();

    for Prepared { index, call } in prepared {
        let semaphore = Arc::clone(&semaphore);
        let tools = Arc::clone(&tools);
        let tracker = Arc::clone(&tracker);
        let shared_catalog = Arc::clone(&shared_catalog);
        let listener = Arc::clone(listener);
        let call_attachments = snapshot_attachments.clone();
        let task_snapshot = Arc::clone(&snapshot);
        let header_factory_header = header_factory.header(Some(call.id.clone()));
        let call_id = call.id.clone();
        let tool_name = call.name.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");

            let node_id = workflow_node_id(iteration, &call_id);
            tracker.ensure_node(&node_id, Some(call.arguments.clone())).await;
            tracker.start_node(&node_id).await;

            let started = Instant::now();
            let mut result = match tools.get(&tool_name) {
                Some(tool) => {
                    let progress_listener = Arc::clone(&listener);
                    let progress_call_id = call_id.clone();
                    let progress_base = header_factory_header.clone();
                    let progress = ProgressEmitter::new(move |chunk: &str, is_complete: bool| {
                        progress_listener.on_event(&Event::ToolProgress {
                            base: progress_base.clone(),
                            call_id: progress_call_id.clone(),
                            chunk: chunk.to_string(),
                            is_complete,
                        });
                    });
                    let ctx = ToolContext {
                        attachments: call_attachments.clone(),
                        progress,
                        task_snapshot: Some((*task_snapshot).clone()),
                    };
                    match tool.execute(call.arguments.clone(), &ctx).await {
                        Ok(output) => {
                            let mut result = ToolResult::success(call_id.clone(), output.content);
                            result.attachments = output.attachments;
                            result.metadata = output.metadata;
                            result
                        }
                        Err(e) => ToolResult::failure(call_id.clone(), e.to_string()),
                    }
                }
                None => ToolResult::failure(call_id.clone(), format!("tool not found: {}", tool_name)),
            };
            result.fill_correlation_from(&call);
            result = strip_a2ui_emit_fields(&tool_name, result);

            let parsed = parse_mutations(result.metadata.as_ref());
            let persist_directive = result
                .metadata
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|m| m.get("persist_note"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());

            let changed = {
                let mut guard = shared_catalog.lock().await;
                let changed = guard.merge(&parsed, &tool_name);
                if let Some(note) = persist_directive {
                    guard.important_notes.push(note);
                }
                changed
            };
            debug!(call_id = %call_id, tool = %tool_name, attachments_changed = changed, "tool call completed");

            let duration_ms = started.elapsed().as_millis() as u64;
            listener.on_event(&Event::ToolCompleted {
                base: header_factory_header,
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                result: result.content.clone(),
                error: result.error.clone(),
                duration_ms,
                metadata: result.metadata.clone(),
                attachments: result.attachments.clone(),
            });
            tracker.complete_success(&node_id, None).await;

            (index, result)
        });
    }

    let mut slots: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!(error = %e, "tool worker task panicked"),
        }
    }

    let shared_catalog = Arc::try_unwrap(shared_catalog)
        .unwrap_or_else(|_| unreachable!("all workers joined before this point"))
        .into_inner();
    let attachments_changed = shared_catalog.attachments != state.attachments
        || shared_catalog.attachment_iterations != state.attachment_iterations
        || !shared_catalog.important_notes.is_empty();
    shared_catalog.write_back(state);

    let results = slots
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.unwrap_or_else(|| ToolResult::failure(format!("slot-{i}"), "tool task did not complete")))
        .collect();

    (results, attachments_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::services::{HeuristicContextManager, NoopFunctionCallParser, NoopWorkflowTracker};
    use crate::core::events::{AgentLevel, NoopEventListener};
    use crate::tools::{Tool, ToolContext, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;
    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> crate::error::Result<crate::tools::ToolOutput> {
            Ok(args.to_string().into())
        }
    }

    struct MutatingTool;
    #[async_trait]
    impl Tool for MutatingTool {
        fn name(&self) -> &str {
            "generate_image"
        }
        fn description(&self) -> &str {
            "produces an attachment"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> crate::error::Result<crate::tools::ToolOutput> {
            Ok("ok".to_string().into())
        }
    }

    struct NullLlmClient;
    #[async_trait]
    impl crate::core::services::LlmClient for NullLlmClient {
        async fn complete(
            &self,
            _request: crate::core::types::CompletionRequest,
        ) -> crate::error::Result<crate::core::types::CompletionResponse> {
            Ok(crate::core::types::CompletionResponse::default())
        }
    }

    fn test_services() -> Services {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(MutatingTool);
        Services::new(Arc::new(NullLlmClient), Arc::new(registry))
            .with_parser(Arc::new(NoopFunctionCallParser))
            .with_context_manager(Arc::new(HeuristicContextManager))
            .with_workflow_tracker(Arc::new(NoopWorkflowTracker))
    }

    #[tokio::test]
    async fn batch_results_are_positionally_stable() {
        let services = test_services();
        let mut state = TaskState::new("s1", "t1");
        let header_factory = EventHeaderFactory::new("s1", "run1");
        let listener: SharedEventListener = Arc::new(NoopEventListener);

        let calls = vec![
            ToolCall::new("a", "echo", json!({"n": 1})),
            ToolCall::new("b", "echo", json!({"n": 2})),
            ToolCall::new("c", "echo", json!({"n": 3})),
        ];

        let (results, _) = dispatch_batch(&calls, &mut state, 1, &services, &header_factory, &listener, 3).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].call_id, "a");
        assert_eq!(results[1].call_id, "b");
        assert_eq!(results[2].call_id, "c");
    }

    #[tokio::test]
    async fn missing_tool_yields_non_fatal_error_result() {
        let services = test_services();
        let mut state = TaskState::new("s1", "t1");
        let header_factory = EventHeaderFactory::new("s1", "run1");
        let listener: SharedEventListener = Arc::new(NoopEventListener);

        let calls = vec![ToolCall::new("a", "does_not_exist", json!({}))];
        let (results, _) = dispatch_batch(&calls, &mut state, 1, &services, &header_factory, &listener, 1).await;
        assert!(results[0].is_error());
        assert!(results[0].error.as_ref().unwrap().contains("tool not found"));
    }

    #[tokio::test]
    async fn attachment_mutations_merge_into_state() {
        let services = test_services();
        let mut state = TaskState::new("s1", "t1");
        let header_factory = EventHeaderFactory::new("s1", "run1");
        let listener: SharedEventListener = Arc::new(NoopEventListener);
        let _ = header_factory.header(None);
        let _ = AgentLevel::Core;

        let mut call = ToolCall::new("a", "generate_image", json!({}));
        call.arguments = json!({});
        let calls = vec![call];

        // MutatingTool doesn't actually set metadata mutations in this
        // lightweight double; confirm the no-op path leaves the catalog empty
        // without panicking under the merge lock.
        let (_, changed) = dispatch_batch(&calls, &mut state, 1, &services, &header_factory, &listener, 1).await;
        assert!(!changed);
        assert!(state.attachments.is_empty());
    }
}
