//! Anthropic Messages API client.
//!
//! Speaks the HTTP API directly: our `ChatMessage` transcript maps onto
//! Anthropic content blocks (`text`, `tool_use`, `tool_result`) and the
//! response blocks map back into `ChatResponse`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::llm::{ChatModel, ChatRequest, ChatResponse, Role, ToolCall};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic-backed chat model.
pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicModel {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
        }
    }

    /// Map our transcript into Anthropic `messages` JSON.
    fn build_messages(messages: &[crate::llm::ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|message| match message.role {
                Role::User => serde_json::json!({
                    "role": "user",
                    "content": message.content,
                }),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(serde_json::json!({
                            "type": "text",
                            "text": message.content,
                        }));
                    }
                    for call in &message.tool_calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    serde_json::json!({
                        "role": "assistant",
                        "content": blocks,
                    })
                }
                // Tool results travel as user-role tool_result blocks.
                Role::Tool => serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id,
                        "content": message.content,
                    }],
                }),
            })
            .collect()
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": Self::build_messages(&request.messages),
        });
        if let Some(ref system) = request.system {
            body["system"] = serde_json::json!(system);
        }
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
        }

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: "anthropic".to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("status {status}: {text}"),
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        parse_response(&payload)
    }
}

/// Pull text and tool_use blocks out of a Messages API response body.
fn parse_response(payload: &serde_json::Value) -> Result<ChatResponse, LlmError> {
    let blocks = payload
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: "anthropic".to_string(),
            reason: "missing content array".to_string(),
        })?;

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = block
                    .get("input")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    };

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn parses_text_response() {
        let payload = serde_json::json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
        });
        let response = parse_response(&payload).unwrap();
        assert_eq!(response.content.as_deref(), Some("Hello!"));
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_use_response() {
        let payload = serde_json::json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "check_availability",
                 "input": {"date": "tomorrow"}},
            ],
            "stop_reason": "tool_use",
        });
        let response = parse_response(&payload).unwrap();
        assert!(response.wants_tools());
        assert_eq!(response.tool_calls[0].name, "check_availability");
        assert_eq!(
            response.tool_calls[0].arguments,
            serde_json::json!({"date": "tomorrow"})
        );
    }

    #[test]
    fn missing_content_is_invalid() {
        let payload = serde_json::json!({"error": "nope"});
        assert!(parse_response(&payload).is_err());
    }

    #[test]
    fn tool_results_map_to_user_blocks() {
        let messages = vec![
            ChatMessage::user("book me in"),
            ChatMessage::assistant_with_calls(
                "",
                vec![ToolCall {
                    id: "toolu_1".into(),
                    name: "check_availability".into(),
                    arguments: serde_json::json!({"date": "today"}),
                }],
            ),
            ChatMessage::tool_result("toolu_1", "open all day"),
        ];
        let mapped = AnthropicModel::build_messages(&messages);
        assert_eq!(mapped[0]["role"], "user");
        assert_eq!(mapped[1]["content"][0]["type"], "tool_use");
        assert_eq!(mapped[2]["role"], "user");
        assert_eq!(mapped[2]["content"][0]["type"], "tool_result");
        assert_eq!(mapped[2]["content"][0]["tool_use_id"], "toolu_1");
    }
}
