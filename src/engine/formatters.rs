//! Tool/message formatters — pure display helpers with no effect on engine
//! state. Not part of the core loop, but exercised by the end-to-end tests
//! (spec §8) which assert on rendered tool messages.

use std::collections::HashMap;

use crate::core::types::{Attachment, Message, MessageSource, TaskState, ToolResult};

use super::catalog;

/// Render a tool call for display (e.g. a TUI transcript line).
pub fn format_tool_call(name: &str, arguments: &serde_json::Value) -> String {
    format!("→ {}({})", name, arguments)
}

/// Render a tool result for display.
pub fn format_tool_result(result: &ToolResult) -> String {
    match &result.error {
        Some(err) => format!("✗ {}", err),
        None => result.content.clone(),
    }
}

/// Append an "Attachments available for follow-up steps" block listing the
/// catalog attachments *not* already mentioned by placeholder in `content`.
/// Per spec §4.3 step 10 this is what makes newly produced attachments
/// discoverable to the model on the next iteration without forcing every
/// tool to narrate them inline.
pub fn ensure_tool_attachment_references(content: &str, state: &TaskState) -> String {
    if state.attachments.is_empty() {
        return content.to_string();
    }

    let referenced = catalog::resolve_content(content, state);
    let mut unreferenced: Vec<&String> = state
        .attachments
        .keys()
        .filter(|name| !referenced.contains_key(*name))
        .collect();
    if unreferenced.is_empty() {
        return content.to_string();
    }
    unreferenced.sort();

    let mut out = content.trim().to_string();
    out.push_str("\n\nAttachments available for follow-up steps:");
    for name in unreferenced {
        out.push_str(&format!("\n- [{}]", name));
    }
    out
}

/// Build the tool-result message appended to the conversation after a
/// batch completes. Resolved per the spec's explicit tie-break (§9 open
/// question 2): trim the result content, then `ensure_tool_attachment_references`.
pub fn build_tool_message(result: &ToolResult, state: &TaskState) -> Message {
    let base = match &result.error {
        Some(err) => format!("Tool {} failed: {}", result.call_id, err),
        None => result.content.trim().to_string(),
    };
    let content = ensure_tool_attachment_references(&base, state);

    let mut msg = Message::tool(result.call_id.clone(), content);
    msg.attachments = attachments_for_message(result);
    msg
}

/// Summarize a batch of tool results into a single `world_diff` line.
pub fn summarize_world_diff(results: &[ToolResult]) -> String {
    let parts: Vec<String> = results
        .iter()
        .map(|r| match &r.error {
            Some(err) => format!("{}: error ({})", r.call_id, err),
            None => format!("{}: ok ({} chars)", r.call_id, r.content.len()),
        })
        .collect();
    parts.join("; ")
}

/// Extract a feedback signal from a tool result's metadata, when it carries
/// a `reward`, `score`, or `value` field (spec §4.3 step 10).
pub fn extract_feedback_signal(result: &ToolResult) -> Option<serde_json::Value> {
    let meta = result.metadata.as_ref()?.as_object()?;
    for key in ["reward", "score", "value"] {
        if let Some(v) = meta.get(key) {
            return Some(serde_json::json!({ "call_id": result.call_id, key: v }));
        }
    }
    None
}

/// Collapse a `ToolResult`'s attachments into a per-message map keyed by
/// placeholder, ready for `Message::with_attachments` / catalog folding.
pub fn attachments_for_message(result: &ToolResult) -> HashMap<String, Attachment> {
    result.attachments.clone()
}

pub fn assistant_message_with_resolved_attachments(content: String, state: &TaskState) -> Message {
    let attachments = catalog::resolve_content(&content, state);
    Message::assistant(content)
        .with_source(MessageSource::AssistantReply)
        .with_attachments(attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Attachment;

    #[test]
    fn ensure_tool_attachment_references_lists_only_unmentioned() {
        let mut state = TaskState::new("s1", "t1");
        state.attachments.insert("a.png".to_string(), Attachment::new("a.png", "image/png"));
        state.attachments.insert("b.png".to_string(), Attachment::new("b.png", "image/png"));

        let out = ensure_tool_attachment_references("see [a.png] here", &state);
        assert!(out.contains("[b.png]"));
        assert!(!out.contains("- [a.png]"));
    }

    #[test]
    fn ensure_tool_attachment_references_no_op_when_all_mentioned() {
        let mut state = TaskState::new("s1", "t1");
        state.attachments.insert("a.png".to_string(), Attachment::new("a.png", "image/png"));
        let out = ensure_tool_attachment_references("see [a.png]", &state);
        assert_eq!(out, "see [a.png]");
    }

    #[test]
    fn build_tool_message_reports_errors() {
        let state = TaskState::new("s1", "t1");
        let result = ToolResult::failure("c1", "boom");
        let msg = build_tool_message(&result, &state);
        assert!(msg.content.contains("Tool c1 failed: boom"));
    }

    #[test]
    fn extract_feedback_signal_reads_reward_field() {
        let mut result = ToolResult::success("c1", "ok");
        result.metadata = Some(serde_json::json!({"reward": 0.5}));
        let signal = extract_feedback_signal(&result).unwrap();
        assert_eq!(signal["reward"], 0.5);
    }

    #[test]
    fn extract_feedback_signal_none_when_absent() {
        let result = ToolResult::success("c1", "ok");
        assert!(extract_feedback_signal(&result).is_none());
    }
}
