use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{ChatRequest, ChatResponse};
use reqwest::Client;
use serde_json::json;

use crate::provider::{usage_from, LlmProvider};

/// Ollama local LLM chat provider.
pub struct OllamaLlm {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaLlm {
    /// Create a new Ollama LLM provider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server URL (e.g. "http://localhost:11434")
    /// * `model` - Model identifier (e.g. "llama3")
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            model,
        }
    }

    fn err(message: String) -> AirwatchError {
        AirwatchError::Llm {
            provider: "ollama".to_string(),
            message,
        }
    }

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role,
                    "content": m.content,
                })
            })
            .collect();

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max));
        }

        json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": options,
        })
    }
}

impl LlmProvider for OllamaLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&url)
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

        let content = parsed["message"]["content"]
            .as_str()
            .ok_or_else(|| Self::err("missing message.content in response".to_string()))?
            .trim()
            .to_string();

        let usage = usage_from(
            parsed["prompt_eval_count"].as_u64(),
            parsed["eval_count"].as_u64(),
        );

        Ok(ChatResponse { content, usage })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
