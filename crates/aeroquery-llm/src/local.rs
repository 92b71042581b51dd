//! Local LLM backend (§4.8): a non-streaming JSON API compatible with
//! Ollama-style `/api/chat`, for self-hosted or offline deployments where
//! the cost tracker's limits default to unlimited. Local models are assumed
//! unable to emit structured tool calls, so tool use always goes through
//! the text-extraction fallback.

use crate::provider::{LlmError, LlmResult, Provider};
use crate::retry::with_backoff;
use crate::types::{extract_tool_calls_from_text, FinishReason, ProviderRequest, ProviderResponse, Usage};
use aeroquery_core::Role;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct LocalProvider {
    client: Client,
    base_url: String,
    models: Vec<String>,
}

impl LocalProvider {
    pub fn new(models: Vec<String>) -> Self {
        Self { client: Client::new(), base_url: DEFAULT_BASE_URL.to_string(), models }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn supports_tool_calling(&self) -> bool {
        false
    }

    async fn process_message(&self, request: ProviderRequest, cancel: CancellationToken) -> LlmResult<ProviderResponse> {
        let known_tools: Vec<String> = request.tools.iter().map(|t| t.name.clone()).collect();

        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage { role: "system".to_string(), content: system.clone() });
        }
        for turn in &request.history {
            if turn.role == Role::System {
                continue;
            }
            messages.push(ChatMessage { role: role_str(turn.role).to_string(), content: turn.content.clone() });
        }
        messages.push(ChatMessage { role: "user".to_string(), content: request.message.clone() });

        let body = ChatRequest {
            model: request.model.clone(),
            messages,
            stream: false,
            options: ChatOptions { temperature: request.temperature, top_p: request.top_p, top_k: request.top_k },
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = with_backoff(|| async {
            let send_fut = self.client.post(&url).json(&body).send();
            let response = tokio::select! {
                res = send_fut => res?,
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            };
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(if status.as_u16() == 429 {
                    LlmError::RateLimited { retry_after_ms: 5_000 }
                } else {
                    LlmError::RequestFailed(format!("{}: {}", status, text))
                });
            }
            response.json::<ChatResponse>().await.map_err(LlmError::NetworkError)
        })
        .await?;

        let (cleaned_text, extracted) = extract_tool_calls_from_text(&response.message.content, &known_tools);
        let finish_reason = if response.done { FinishReason::Stop } else { FinishReason::Length };

        Ok(ProviderResponse {
            text: cleaned_text,
            tools_used: Vec::new(),
            extracted_tool_calls: extracted,
            tokens_used: Some(Usage {
                input_tokens: response.prompt_eval_count.unwrap_or(0),
                output_tokens: response.eval_count.unwrap_or(0),
            }),
            cost_estimate: Some(0.0),
            finish_reason,
            thinking: None,
        })
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
        Role::System => "system",
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_support_tool_calling() {
        let provider = LocalProvider::new(vec!["llama3".to_string()]);
        assert!(!provider.supports_tool_calling());
        assert_eq!(provider.name(), "local");
    }
}
