//! Engine configuration.
//!
//! No file/env loading lives here — that's CLI/config-surface territory and
//! explicitly out of scope. `EngineConfig` is just the in-process knobs the
//! embedding application sets when it constructs a `ReactEngine`, following
//! the teacher's `LoopConfig` named-constructor style.

use crate::core::types::GenerationOptions;

/// Tunables for one ReAct run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Iteration budget before max-iteration recovery kicks in.
    pub max_iterations: u32,
    /// Tool dispatcher concurrency; 1 means strictly sequential.
    pub tool_concurrency: usize,
    pub generation_options: GenerationOptions,
    /// Require a successful `plan` tool call before any action tool per run.
    pub require_plan_gate: bool,
    /// Require a successful `clarify` tool call (per task id) before any
    /// non-plan/clarify tool.
    pub require_clarify_gate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iterations: 10,
            tool_concurrency: 1,
            generation_options: GenerationOptions::default(),
            require_plan_gate: true,
            require_clarify_gate: true,
        }
    }
}

impl EngineConfig {
    /// Generous limits suitable for a long-lived chat surface.
    pub fn chat() -> Self {
        EngineConfig {
            max_iterations: 50,
            tool_concurrency: 4,
            ..Default::default()
        }
    }

    /// Tight limits suitable for a quick, single-shot invocation.
    pub fn quick() -> Self {
        EngineConfig {
            max_iterations: 5,
            tool_concurrency: 1,
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_tool_concurrency(mut self, n: usize) -> Self {
        self.tool_concurrency = n.max(1);
        self
    }

    pub fn without_gates(mut self) -> Self {
        self.require_plan_gate = false;
        self.require_clarify_gate = false;
        self
    }
}
