use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{ChatRequest, ChatResponse};
use reqwest::Client;
use serde_json::json;

use crate::provider::{usage_from, LlmProvider};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude LLM provider.
pub struct AnthropicLlm {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicLlm {
    /// Create a new Anthropic LLM provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model identifier (e.g. "claude-sonnet-4-20250514")
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    fn err(message: String) -> AirwatchError {
        AirwatchError::Llm {
            provider: "anthropic".to_string(),
            message,
        }
    }

    /// Build the request body. System messages are lifted into the top-level
    /// `system` field; everything else is passed through in order.
    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let mut system = None;
        let mut messages = Vec::new();

        for m in &request.messages {
            if m.role == "system" {
                system = Some(m.content.clone());
            } else {
                messages.push(json!({
                    "role": m.role,
                    "content": m.content,
                }));
            }
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(512),
            "messages": messages,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(sys) = system {
                obj.insert("system".to_string(), json!(sys));
            }
            if let Some(temp) = request.temperature {
                obj.insert("temperature".to_string(), json!(temp));
            }
        }

        body
    }
}

impl LlmProvider for AnthropicLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::err(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let response_text = response
            .text()
            .await
            .map_err(|e| Self::err(format!("failed to read response body: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(AirwatchError::Http {
                status,
                body: response_text,
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| Self::err(format!("failed to parse response JSON: {e}")))?;

        let content = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string();

        let usage = usage_from(
            parsed["usage"]["input_tokens"].as_u64(),
            parsed["usage"]["output_tokens"].as_u64(),
        );

        Ok(ChatResponse { content, usage })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
