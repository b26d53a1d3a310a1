//! A user-uploaded attachment referenced by its bracketed placeholder in the
//! model's final answer gets rewritten into an inline markdown reference and
//! surfaces in the terminal result's attachment map.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use react_engine::{Attachment, EngineConfig, ReactEngine, Services, TaskState, ToolRegistry};
use support::{ScriptedLlm, Turn};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn uploaded_attachment_placeholder_resolves_in_final_answer() {
    let llm = Arc::new(ScriptedLlm::new(vec![Turn::text("Here is your photo: [photo.jpg]")]));
    let services = Services::new(llm, Arc::new(ToolRegistry::new()));
    let engine = ReactEngine::new(EngineConfig::default().without_gates(), services);

    let mut photo = Attachment::new("photo.jpg", "image/jpeg");
    photo.uri = Some("https://cdn.example.com/photo.jpg".to_string());
    let mut pending = HashMap::new();
    pending.insert("photo.jpg".to_string(), photo);

    let mut state = TaskState::new("session-1", "task-1");
    state.pending_user_attachments = pending;

    let result = engine
        .run("what does my photo look like", state, CancellationToken::new())
        .await
        .unwrap();

    assert!(result.answer.contains("![photo.jpg](https://cdn.example.com/photo.jpg)"));
    assert_eq!(result.attachments.len(), 1);
    assert_eq!(result.attachments["photo.jpg"].uri.as_deref(), Some("https://cdn.example.com/photo.jpg"));
}
