//! Shared test doubles for the black-box scenario tests in this directory.
//! Grounded in the unit-test doubles already used inside `src/engine/*.rs`
//! (`StaticLlm`, `ScriptedLlm`, `EchoTool`) but promoted to an integration
//! module since every scenario here drives the public API, not a single
//! engine submodule.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::Value;

use react_engine::core::LlmClient;
use react_engine::{Attachment, CompletionRequest, CompletionResponse, ToolCall, ToolContext, ToolOutput};

/// One scripted completion turn: plain text, or text plus native tool calls.
pub struct Turn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    pub fn text(content: impl Into<String>) -> Self {
        Turn { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Turn { content: String::new(), tool_calls: vec![call] }
    }
}

/// An `LlmClient` that plays back a fixed sequence of turns, one per
/// `complete` call, then falls back to an empty response if exhausted.
pub struct ScriptedLlm {
    turns: StdMutex<Vec<Turn>>,
}

impl ScriptedLlm {
    pub fn new(turns: Vec<Turn>) -> Self {
        ScriptedLlm { turns: StdMutex::new(turns) }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: CompletionRequest) -> react_engine::Result<CompletionResponse> {
        let mut turns = self.turns.lock().unwrap();
        let turn = if turns.is_empty() {
            Turn::text("")
        } else {
            turns.remove(0)
        };
        Ok(CompletionResponse {
            content: turn.content,
            tool_calls: turn.tool_calls,
            stop_reason: None,
            usage: None,
            metadata: Default::default(),
        })
    }
}

/// Echoes its arguments back as the tool result content.
pub struct EchoTool;

#[async_trait]
impl react_engine::Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input back"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> react_engine::Result<ToolOutput> {
        Ok(args.to_string().into())
    }
}

/// Reports a freshly generated attachment alongside its content, exercising
/// the tool-output attachment path `build_tool_message`/`register_from_message`
/// fold into the catalog.
pub struct GenerateChartTool;

#[async_trait]
impl react_engine::Tool for GenerateChartTool {
    fn name(&self) -> &str {
        "generate_chart"
    }
    fn description(&self) -> &str {
        "generates a chart image"
    }
    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> react_engine::Result<ToolOutput> {
        let mut att = Attachment::new("chart.png", "image/png");
        att.uri = Some("https://example.com/chart.png".to_string());
        Ok(ToolOutput::text("chart generated").with_attachment(att))
    }
}
