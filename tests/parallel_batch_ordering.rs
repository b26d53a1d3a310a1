//! Three tools dispatched in one batch with concurrency=3: even though the
//! fastest call finishes first, results land back in call order and every
//! `workflow.tool.completed` event still carries the call id it belongs to
//! (spec.md §8 scenario 6).

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use react_engine::core::{Event, EventHeaderFactory, EventListener};
use react_engine::{Services, TaskState, ToolCall, ToolContext, ToolOutput, ToolRegistry};

/// Sleeps for a configured delay before reporting its own name — lets the
/// test force out-of-order completion while dispatch order (A, B, C) stays
/// fixed.
struct DelayedEchoTool {
    name: &'static str,
    delay_ms: u64,
}

#[async_trait]
impl react_engine::Tool for DelayedEchoTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "echoes after a configured delay"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> react_engine::Result<ToolOutput> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(ToolOutput::text(format!("{} done", self.name)))
    }
}

struct RecordingListener {
    events: std::sync::Mutex<Vec<Event>>,
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn batch_results_stay_positional_despite_out_of_order_completion() {
    let mut registry = ToolRegistry::new();
    registry.register(DelayedEchoTool { name: "A", delay_ms: 30 });
    registry.register(DelayedEchoTool { name: "B", delay_ms: 1 });
    registry.register(DelayedEchoTool { name: "C", delay_ms: 15 });

    let llm = Arc::new(support::ScriptedLlm::new(vec![]));
    let services = Services::new(llm, Arc::new(registry));
    let listener = Arc::new(RecordingListener { events: std::sync::Mutex::new(Vec::new()) });
    let shared_listener: Arc<dyn EventListener> = listener.clone();

    let header_factory = EventHeaderFactory::new("s1", "run1");
    let mut state = TaskState::new("s1", "t1");

    let calls = vec![
        ToolCall::new("call-a", "A", json!({})),
        ToolCall::new("call-b", "B", json!({})),
        ToolCall::new("call-c", "C", json!({})),
    ];

    let (results, _changed) = react_engine::engine::dispatcher::dispatch_batch(
        &calls,
        &mut state,
        1,
        &services,
        &header_factory,
        &shared_listener,
        3,
    )
    .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].call_id, "call-a");
    assert_eq!(results[1].call_id, "call-b");
    assert_eq!(results[2].call_id, "call-c");
    assert_eq!(results[0].content, "A done");
    assert_eq!(results[1].content, "B done");
    assert_eq!(results[2].content, "C done");

    let completed_order: Vec<String> = listener
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::ToolCompleted { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();

    // Completion order reflects the artificial delays (B fastest, then C,
    // then A) even though dispatch and the returned result slots are in
    // call order (A, B, C).
    assert_eq!(completed_order, vec!["call-b", "call-c", "call-a"]);
}
