use airwatch_core::config::Config;
use airwatch_core::error::{AirwatchError, Result};
use airwatch_core::types::{ChatMessage, ChatRequest, ChatResponse};
use airwatch_llm::anthropic::AnthropicLlm;
use airwatch_llm::ollama::OllamaLlm;
use airwatch_llm::provider::LlmProvider;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::service::prompt::SYSTEM_PROMPT;

/// Prompt in, answer text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Dispatches generation to the configured provider.
///
/// Providers are built per call from config, so nothing here holds a
/// connection between requests.
#[derive(Clone)]
pub struct LlmDispatch {
    config: Config,
}

impl LlmDispatch {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let provider = &self.config.llm.provider;
        let model = &self.config.llm.model;
        info!("[llm] calling {provider}/{model}");
        let result = match provider.as_str() {
            "anthropic" => {
                let p = AnthropicLlm::new(self.config.llm.api_key.clone(), model.clone());
                p.chat(request).await
            }
            "ollama" => {
                let p = OllamaLlm::new(self.config.ollama.base_url.clone(), model.clone());
                p.chat(request).await
            }
            other => Err(AirwatchError::Config(format!(
                "unknown LLM provider: '{other}'. Supported: anthropic, ollama"
            ))),
        };
        match &result {
            Ok(resp) => {
                if let Some(usage) = &resp.usage {
                    info!(
                        "[llm] OK, {} in / {} out tokens",
                        usage.input_tokens, usage.output_tokens
                    );
                }
            }
            Err(e) => warn!("[llm] ERROR: {e}"),
        }
        result
    }
}

#[async_trait]
impl Generator for LlmDispatch {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::text("system", SYSTEM_PROMPT),
                ChatMessage::text("user", prompt),
            ],
            max_tokens: Some(self.config.llm.max_tokens),
            temperature: Some(self.config.llm.temperature),
        };
        let response = self.chat(request).await?;
        Ok(response.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let mut config = Config::default();
        config.llm.provider = "nova".to_string();
        let err = LlmDispatch::new(config).generate("hi").await.unwrap_err();
        assert!(matches!(err, AirwatchError::Config(_)));
        assert!(err.to_string().contains("nova"));
    }
}
