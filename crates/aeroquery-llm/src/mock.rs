//! Deterministic, offline provider (§4.8) used by tests and local
//! development when no cloud credentials are configured. Never makes a
//! network call; its "model" is a handful of fixed templates keyed off the
//! system preamble and the incoming message.

use crate::provider::{LlmResult, Provider};
use crate::types::{FinishReason, ProviderRequest, ProviderResponse, Usage};
use tokio_util::sync::CancellationToken;

pub struct MockProvider;

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> Vec<String> {
        vec!["mock-deterministic".to_string()]
    }

    fn supports_tool_calling(&self) -> bool {
        false
    }

    async fn process_message(&self, request: ProviderRequest, _cancel: CancellationToken) -> LlmResult<ProviderResponse> {
        let context_present = request.system.as_deref().unwrap_or("").contains("RETRIEVED DATA");
        let text = if context_present {
            "Based on the available data, here is a summary of the air quality you asked about.".to_string()
        } else {
            format!("I heard: \"{}\". I can help with air quality, forecasts, and health advice.", request.message)
        };

        Ok(ProviderResponse {
            text,
            tools_used: Vec::new(),
            extracted_tool_calls: Vec::new(),
            tokens_used: Some(Usage { input_tokens: request.message.len() as u32 / 4, output_tokens: 20 }),
            cost_estimate: Some(0.0),
            finish_reason: FinishReason::Stop,
            thinking: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_deterministically_without_context() {
        let provider = MockProvider::new();
        let request = ProviderRequest::new("mock-deterministic", "What's the air quality in Lagos?");
        let a = provider.process_message(request.clone(), CancellationToken::new()).await.unwrap();
        let b = provider.process_message(request, CancellationToken::new()).await.unwrap();
        assert_eq!(a.text, b.text);
    }

    #[tokio::test]
    async fn summarizes_when_context_was_injected() {
        let provider = MockProvider::new();
        let mut request = ProviderRequest::new("mock-deterministic", "tell me more");
        request.system = Some("RETRIEVED DATA — use to answer:\n- Lagos: AQI 80".to_string());
        let response = provider.process_message(request, CancellationToken::new()).await.unwrap();
        assert!(response.text.contains("summary"));
    }
}
