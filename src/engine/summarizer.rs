//! Final-answer summarizer (spec §4.5 second half): an optional post-loop
//! pass that rewrites the raw final answer into a short, user-facing
//! summary while preserving attachment placeholders verbatim.
//!
//! Disabled by default — `ReactEngine` without `with_summarizer` just
//! emits the raw finalize output as the single terminal event.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::core::events::{Event, EventHeaderFactory};
use crate::core::services::{ContentDeltaCallback, Services, SharedEventListener};
use crate::core::types::{CompletionRequest, GenerationOptions, Message, TaskResult};

use super::react::{emit_terminal, TerminalGuard};

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the assistant's final answer for the user in under 160 words. \
Preserve every `[name]` attachment placeholder exactly as written — do not rename, drop, or rephrase them.";

/// Rewrites a raw final answer via one streaming completion call, emitting
/// `workflow.result.final` deltas (`is_streaming=true`) as they arrive and
/// exactly one closing event (`stream_finished=true`).
pub struct FinalAnswerSummarizer {
    max_words: usize,
}

impl Default for FinalAnswerSummarizer {
    fn default() -> Self {
        FinalAnswerSummarizer { max_words: 160 }
    }
}

impl FinalAnswerSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = max_words;
        self
    }

    fn build_request(&self, result: &TaskResult) -> CompletionRequest {
        let transcript: String = result
            .messages
            .iter()
            .filter(|m| m.role != crate::core::types::Role::System)
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        CompletionRequest {
            messages: vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(format!(
                    "Transcript:\n{}\n\nRaw final answer:\n{}\n\nWrite the user-facing summary (max {} words).",
                    transcript, result.answer, self.max_words
                )),
            ],
            tools: Vec::new(),
            options: GenerationOptions::default(),
            metadata: Default::default(),
        }
    }

    /// Stream a rewritten answer, emitting partial terminal events along the
    /// way and claiming the one-shot guard on the final chunk. On an LLM
    /// error the original `result` is emitted unchanged, with no partial
    /// updates — a failed rewrite must never leave the run without a
    /// terminal event.
    pub async fn summarize_and_emit(
        &self,
        result: TaskResult,
        services: &Services,
        guard: &TerminalGuard,
        header_factory: &Arc<EventHeaderFactory>,
        listener: &SharedEventListener,
    ) -> TaskResult {
        let request = self.build_request(&result);

        let last_partial: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let on_delta: ContentDeltaCallback = {
            let header_factory = header_factory.clone();
            let listener = listener.clone();
            let result_attachments = result.attachments.clone();
            let total_iterations = result.iterations;
            let total_tokens = result.tokens_used.total_tokens;
            let stop_reason = result.stop_reason;
            let duration_ms = result.duration.as_millis() as u64;
            let last_partial = last_partial.clone();
            Box::new(move |delta: &str, is_final: bool| {
                if is_final {
                    return;
                }
                let mut last = last_partial.lock().unwrap();
                if last.as_deref() == Some(delta) {
                    return;
                }
                *last = Some(delta.to_string());
                listener.on_event(&Event::ResultFinal {
                    base: header_factory.header(None),
                    final_answer: delta.to_string(),
                    total_iterations,
                    total_tokens,
                    stop_reason,
                    duration_ms,
                    is_streaming: true,
                    stream_finished: false,
                    attachments: result_attachments.clone(),
                });
            })
        };

        match services.llm_client.stream_complete(request, on_delta).await {
            Ok(response) if !response.content.trim().is_empty() => {
                let mut rewritten = result;
                rewritten.answer = response.content.trim().to_string();
                emit_terminal(guard, header_factory, listener, &rewritten, false);
                rewritten
            }
            Ok(_) => {
                emit_terminal(guard, header_factory, listener, &result, false);
                result
            }
            Err(err) => {
                warn!(error = %err, "final-answer summarizer failed; emitting raw answer");
                emit_terminal(guard, header_factory, listener, &result, false);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::NoopEventListener;
    use crate::core::types::{CompletionResponse, StopReason, TaskState};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;

    struct StaticLlm(String);

    #[async_trait]
    impl crate::core::services::LlmClient for StaticLlm {
        async fn complete(&self, _request: CompletionRequest) -> crate::error::Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: self.0.clone(),
                tool_calls: Vec::new(),
                stop_reason: None,
                usage: None,
                metadata: Default::default(),
            })
        }
    }

    fn sample_result() -> TaskResult {
        let state = TaskState::new("s1", "t1");
        TaskResult {
            answer: "raw answer".to_string(),
            messages: state.messages,
            iterations: 1,
            tokens_used: Default::default(),
            stop_reason: StopReason::FinalAnswer,
            duration: std::time::Duration::from_millis(5),
            session_id: "s1".to_string(),
            task_id: "t1".to_string(),
            attachments: Default::default(),
        }
    }

    #[tokio::test]
    async fn summarize_rewrites_answer_and_claims_guard() {
        let services = Services::new(
            Arc::new(StaticLlm("shorter answer".to_string())),
            Arc::new(ToolRegistry::new()),
        );
        let header_factory = Arc::new(EventHeaderFactory::new("s1", "run1"));
        let listener: SharedEventListener = Arc::new(NoopEventListener);
        let guard = TerminalGuard::new();

        let summarizer = FinalAnswerSummarizer::new();
        let result = summarizer
            .summarize_and_emit(sample_result(), &services, &guard, &header_factory, &listener)
            .await;

        assert_eq!(result.answer, "shorter answer");
        assert!(!guard.claim());
    }

    #[tokio::test]
    async fn summarize_falls_back_to_raw_answer_on_blank_rewrite() {
        let services = Services::new(Arc::new(StaticLlm(String::new())), Arc::new(ToolRegistry::new()));
        let header_factory = Arc::new(EventHeaderFactory::new("s1", "run1"));
        let listener: SharedEventListener = Arc::new(NoopEventListener);
        let guard = TerminalGuard::new();

        let summarizer = FinalAnswerSummarizer::new();
        let result = summarizer
            .summarize_and_emit(sample_result(), &services, &guard, &header_factory, &listener)
            .await;

        assert_eq!(result.answer, "raw answer");
    }
}
