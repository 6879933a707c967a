use airwatch_core::error::Result;
use airwatch_core::types::{ChatRequest, ChatResponse};

/// Trait for LLM chat completion providers.
pub trait LlmProvider: Send + Sync {
    /// Send a chat request and receive a completion response.
    fn chat(&self, request: ChatRequest) -> impl std::future::Future<Output = Result<ChatResponse>> + Send;

    /// Return the provider name (e.g. "anthropic", "ollama").
    fn name(&self) -> &str;
}

/// Pull a usage pair out of a provider response, if both counts are present.
pub(crate) fn usage_from(input: Option<u64>, output: Option<u64>) -> Option<airwatch_core::types::Usage> {
    match (input, output) {
        (Some(input), Some(output)) => Some(airwatch_core::types::Usage {
            input_tokens: input as u32,
            output_tokens: output as u32,
        }),
        _ => None,
    }
}
