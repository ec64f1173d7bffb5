//! Chat model abstraction
//!
//! The agent talks to models through [`ChatModel`]. The live implementation is
//! an OpenAI-compatible chat-completions client; [`ScriptedModel`] replays
//! canned responses for offline runs and tests.

use crate::error::AssistantError;
use crate::models::{TokenUsage, ToolCall, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

pub mod openai;
pub use openai::OpenAiCompatibleModel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// One model turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ToolCall {
                id: new_call_id(),
                name: name.into(),
                arguments,
            }],
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Run one completion. An empty `tools` slice means tools are disabled.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse>;
}

pub(crate) fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Drop reasoning emitted before `</think>` by R1-style models.
pub fn strip_reasoning(text: &str) -> &str {
    match text.rfind("</think>") {
        Some(idx) => text[idx + "</think>".len()..].trim(),
        None => text.trim(),
    }
}

/// Recover a tool call that the model wrote as text, e.g.
/// `Action: {"name": "list_tables", "arguments": {}}`.
///
/// Without the `Action:` marker only `final_answer` and names in
/// `known_tools` count, so an answer that merely contains JSON with a
/// `name` field stays an answer.
pub fn parse_text_action(text: &str, known_tools: &[&str]) -> Option<ToolCall> {
    let text = strip_reasoning(text);
    let (candidate, marked) = match text.find("Action:") {
        Some(idx) => (&text[idx + "Action:".len()..], true),
        None => (text, false),
    };

    let start = candidate.find('{')?;
    let parsed = first_json_object(&candidate[start..])?;

    let name = parsed.get("name")?.as_str()?.to_string();
    if !marked && name != "final_answer" && !known_tools.contains(&name.as_str()) {
        return None;
    }
    let arguments = parsed
        .get("arguments")
        .or_else(|| parsed.get("args"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    Some(ToolCall {
        id: new_call_id(),
        name,
        arguments,
    })
}

/// Parse the first complete JSON object at the start of `text`.
fn first_json_object(text: &str) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) if value.is_object() => Some(value),
        _ => {
            // Fall back to the widest brace span.
            let end = text.rfind('}')?;
            serde_json::from_str::<Value>(&text[..=end])
                .ok()
                .filter(Value::is_object)
        }
    }
}

/// Replays a fixed list of responses, then fails.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    received: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Message lists seen so far, one entry per completion call.
    pub fn received(&self) -> Vec<Vec<ChatMessage>> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelResponse> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }

        self.responses
            .lock()
            .map_err(|_| AssistantError::LlmError("scripted model lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| AssistantError::LlmError("scripted model has no more responses".to_string()))
    }
}
