//! Workflow recorder: stable node ids and idempotent start/success/failure
//! bookkeeping against the injected `WorkflowTracker`.
//!
//! This is pure observability plumbing — recording happens alongside event
//! emission but never gates execution (a tracker that panics or lies about
//! node state cannot change what the engine does next).

use std::sync::Arc;

use serde_json::Value;

use crate::core::services::WorkflowTracker;

/// Stable node id for the run-wide context/precondition step.
pub const CONTEXT_NODE: &str = "react:context";
/// Stable node id for the finalize step.
pub const FINALIZE_NODE: &str = "react:finalize";

/// Builds the stable workflow node ids from spec §6.
pub struct NodeIds;

impl NodeIds {
    pub fn think(iteration: u32) -> String {
        format!("react:iter:{}:think", iteration)
    }

    pub fn plan(iteration: u32) -> String {
        format!("react:iter:{}:plan", iteration)
    }

    pub fn tools(iteration: u32) -> String {
        format!("react:iter:{}:tools", iteration)
    }

    pub fn tool(iteration: u32, call_id: &str) -> String {
        format!("react:iter:{}:tool:{}", iteration, call_id)
    }
}

/// Thin wrapper recording node-level lifecycle against a `WorkflowTracker`.
/// `ensure_node` is idempotent on repeat calls per the tracker's contract,
/// so every helper here always ensures before starting.
pub struct WorkflowRecorder {
    tracker: Arc<dyn WorkflowTracker>,
}

impl WorkflowRecorder {
    pub fn new(tracker: Arc<dyn WorkflowTracker>) -> Self {
        WorkflowRecorder { tracker }
    }

    /// Ensure + start a node, returning once it is marked running.
    pub async fn start(&self, id: &str, input: Option<Value>) {
        self.tracker.ensure_node(id, input).await;
        self.tracker.start_node(id).await;
    }

    pub async fn succeed(&self, id: &str, output: Option<Value>) {
        self.tracker.complete_success(id, output).await;
    }

    pub async fn fail(&self, id: &str, err: &str) {
        self.tracker.complete_failure(id, err).await;
    }

    /// Record a node that starts and immediately succeeds, for steps with
    /// no meaningful "running" interval to observe (e.g. the plan node,
    /// which is just a count/names summary of an already-completed think).
    pub async fn record_instant_success(&self, id: &str, input: Option<Value>, output: Option<Value>) {
        self.start(id, input).await;
        self.succeed(id, output).await;
    }
}
