//! OpenAI-compatible chat-completions client (Together, OpenAI, vLLM, ...)
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{new_call_id, parse_text_action, strip_reasoning, ChatMessage, ChatModel, ModelResponse, Role};
use crate::config::Config;
use crate::error::AssistantError;
use crate::models::{TokenUsage, ToolCall, ToolSpec};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OpenAiCompatibleModel {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleModel {
    pub fn new(
        api_key: impl Into<String>,
        api_base: &str,
        model: impl Into<String>,
        temperature: f32,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "LLM API key not configured (set TOGETHER_API_KEY)".to_string(),
            ));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            model: model.into(),
            temperature,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.llm_api_key.clone().ok_or_else(|| {
            AssistantError::Config("LLM API key not configured (set TOGETHER_API_KEY)".to_string())
        })?;
        Self::new(
            api_key,
            &config.llm_api_base,
            config.llm_model.clone(),
            config.llm_temperature,
        )
    }

    fn build_request<'a>(&'a self, messages: &'a [ChatMessage], tools: &[ToolSpec]) -> CompletionRequest<'a> {
        let tools: Vec<WireTool> = tools
            .iter()
            .map(|spec| WireTool {
                tool_type: "function",
                function: WireFunction {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                },
            })
            .collect();

        CompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: self.temperature,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelResponse> {
        let request = self.build_request(messages, tools);

        debug!(
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Calling chat completions"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completions request failed: {}", e);
                AssistantError::LlmError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat completions error response ({}): {}", status, error_text);
            return Err(AssistantError::LlmError(format!(
                "API returned {}: {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse chat completions response: {}", e);
            AssistantError::LlmError(format!("parse error: {}", e))
        })?;

        let known_tools: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let parsed = into_model_response(completion, &known_tools)?;
        info!(
            tool_calls = parsed.tool_calls.len(),
            total_tokens = parsed.usage.total_tokens,
            "Model response received"
        );
        Ok(parsed)
    }
}

fn into_model_response(completion: CompletionResponse, known_tools: &[&str]) -> Result<ModelResponse> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AssistantError::LlmError("response contained no choices".to_string()))?;

    let content = choice.message.content.unwrap_or_default();
    let mut tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call.id.unwrap_or_else(new_call_id),
            name: call.function.name,
            arguments: decode_arguments(call.function.arguments),
        })
        .collect();

    // Models without native tool calling write the action into the text.
    if tool_calls.is_empty() {
        if let Some(call) = parse_text_action(&content, known_tools) {
            tool_calls.push(call);
        }
    }

    let content = if tool_calls.is_empty() {
        strip_reasoning(&content).to_string()
    } else {
        content
    };

    Ok(ModelResponse {
        content,
        tool_calls,
        usage: completion.usage.map(TokenUsage::from).unwrap_or_default(),
    })
}

/// Arguments normally arrive as a JSON string; some servers send an object.
fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Value::Null => json!({}),
        other => other,
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role,
            content: &message.content,
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.as_deref(),
            name: message.name.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: "calculator".to_string(),
            description: "Math".to_string(),
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
        }
    }

    #[test]
    fn test_request_serialization() {
        let model = OpenAiCompatibleModel::new("key", "https://api.example.com/v1/", "m", 0.0).unwrap();
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "calculator".to_string(),
            arguments: json!({ "expression": "1+1" }),
        };
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::assistant("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "{\"result\": 2.0}"),
        ];

        let body = serde_json::to_value(model.build_request(&messages, &[spec()])).unwrap();
        assert_eq!(model.endpoint, "https://api.example.com/v1/chat/completions");
        assert_eq!(body["tool_choice"], json!("auto"));
        assert_eq!(body["tools"][0]["type"], json!("function"));
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            json!("{\"expression\":\"1+1\"}")
        );
        assert_eq!(body["messages"][2]["role"], json!("tool"));
        assert_eq!(body["messages"][2]["tool_call_id"], json!("call_1"));

        let bare = serde_json::to_value(model.build_request(&messages, &[])).unwrap();
        assert!(bare.get("tools").is_none());
        assert!(bare.get("tool_choice").is_none());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = OpenAiCompatibleModel::from_config(&Config::default()).err().unwrap();
        assert!(matches!(err, AssistantError::Config(_)));
    }

    #[tokio::test]
    async fn test_native_tool_calls_are_decoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({ "model": "test-model", "temperature": 0.0 })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_abc",
                                "type": "function",
                                "function": {
                                    "name": "execute_query",
                                    "arguments": "{\"query\": \"SELECT 1\"}"
                                }
                            }]
                        }
                    }],
                    "usage": { "prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let model = OpenAiCompatibleModel::new("secret", &server.url(), "test-model", 0.0).unwrap();
        let response = model
            .complete(&[ChatMessage::user("hi")], &[spec()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.tool_calls[0].arguments, json!({ "query": "SELECT 1" }));
        assert_eq!(response.usage.total_tokens, 120);
    }

    #[tokio::test]
    async fn test_text_action_fallback_and_plain_answer() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                json!({
                    "choices": [{ "message": { "content":
                        "<think>need schema</think>\nAction:\n{\"name\": \"list_tables\", \"arguments\": {}}"
                    } }]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let model = OpenAiCompatibleModel::new("k", &server.url(), "m", 0.0).unwrap();
        let response = model.complete(&[ChatMessage::user("hi")], &[]).await.unwrap();
        assert_eq!(response.tool_calls[0].name, "list_tables");

        let plain = into_model_response(CompletionResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: Some("<think>sum it</think> Total: 150 RUB".to_string()),
                    tool_calls: None,
                },
            }],
            usage: None,
        }, &["execute_query"])
        .unwrap();
        assert!(plain.tool_calls.is_empty());
        assert_eq!(plain.content, "Total: 150 RUB");
    }

    #[test]
    fn test_answer_with_embedded_json_stays_text() {
        let content = r#"Top counterparty: {"name": "Diaz PLC", "amount": 10054.09}"#;
        let response = into_model_response(
            CompletionResponse {
                choices: vec![Choice {
                    message: ResponseMessage {
                        content: Some(content.to_string()),
                        tool_calls: None,
                    },
                }],
                usage: None,
            },
            &["execute_query", "final_answer"],
        )
        .unwrap();
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.content, content);
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let model = OpenAiCompatibleModel::new("k", &server.url(), "m", 0.0).unwrap();
        let err = model.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_decode_arguments_keeps_unparseable_strings() {
        assert_eq!(decode_arguments(json!("")), json!({}));
        assert_eq!(decode_arguments(json!({ "a": 1 })), json!({ "a": 1 }));
        assert_eq!(decode_arguments(json!("5429.09 * 1.08")), json!("5429.09 * 1.08"));
    }
}
