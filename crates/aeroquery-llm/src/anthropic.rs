//! Cloud LLM backend over the Anthropic Messages API, in both the
//! tool-calling and non-tool-calling variants (§4.8). Both share the same
//! SSE transport; `CloudWithToolsProvider` declares tool schemas and trusts
//! the model's own `tool_use` blocks, `CloudWithoutToolsProvider` never
//! sends a tool schema and instead recovers tool calls from free-form text.

use crate::provider::{LlmError, LlmResult, Provider};
use crate::retry::with_backoff;
use crate::types::{extract_tool_calls_from_text, FinishReason, ProviderRequest, ProviderResponse, Usage};
use aeroquery_core::Role;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MODELS: &[&str] = &["claude-sonnet-4-20250514", "claude-3-5-haiku-20241022"];

struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    fn new(api_key: impl Into<String>) -> Self {
        Self { client: Client::new(), api_key: api_key.into(), base_url: ANTHROPIC_API_URL.to_string() }
    }

    fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sends one request, accumulates the SSE stream into a single
    /// response, retrying transient/rate-limit failures with backoff.
    async fn send(
        &self,
        request: &ProviderRequest,
        include_tools: bool,
        cancel: CancellationToken,
    ) -> LlmResult<Accumulated> {
        with_backoff(|| self.send_once(request, include_tools, cancel.clone())).await
    }

    async fn send_once(
        &self,
        request: &ProviderRequest,
        include_tools: bool,
        cancel: CancellationToken,
    ) -> LlmResult<Accumulated> {
        let mut messages: Vec<AnthropicMessage> = request
            .history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage { role: role_str(m.role).to_string(), content: serde_json::json!(m.content) })
            .collect();
        messages.push(AnthropicMessage { role: "user".to_string(), content: serde_json::json!(request.message) });

        let body = AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(8192),
            stream: true,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            system: request.system.clone(),
            tools: if include_tools && !request.tools.is_empty() {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| AnthropicTool {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            input_schema: t.input_schema.clone(),
                        })
                        .collect(),
                )
            } else {
                None
            },
        };

        debug!(model = %body.model, "anthropic request");

        let send_fut = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            res = send_fut => res?,
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, body = %error_text, "anthropic error response");
            return Err(match status.as_u16() {
                401 => LlmError::AuthFailed(error_text),
                429 => LlmError::RateLimited { retry_after_ms: 60_000 },
                _ => LlmError::RequestFailed(format!("{}: {}", status, error_text)),
            });
        }

        accumulate_sse(response.bytes_stream(), cancel).await
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "user",
        Role::System => "user",
    }
}

#[derive(Default)]
struct Accumulated {
    text: String,
    thinking: String,
    tool_uses: Vec<(String, String)>, // (name, accumulated json args)
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

async fn accumulate_sse(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send,
    cancel: CancellationToken,
) -> LlmResult<Accumulated> {
    let mut acc = Accumulated::default();
    let mut buffer = String::new();
    let mut current_tool: Option<(String, String, String)> = None; // (id, name, args)

    tokio::pin!(bytes_stream);

    loop {
        let chunk = tokio::select! {
            next = bytes_stream.next() => match next {
                Some(Ok(c)) => c,
                Some(Err(e)) => return Err(LlmError::StreamError(e.to_string())),
                None => break,
            },
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(event_end) = buffer.find("\n\n") {
            let event_str = buffer[..event_end].to_string();
            buffer = buffer[event_end + 2..].to_string();

            let mut event_type = String::new();
            let mut event_data = String::new();
            for line in event_str.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event_type = rest.to_string();
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    event_data = rest.to_string();
                }
            }
            if event_data.is_empty() {
                continue;
            }

            match event_type.as_str() {
                "content_block_start" => {
                    if let Ok(data) = serde_json::from_str::<ContentBlockStart>(&event_data) {
                        if let ContentBlockType::ToolUse { id, name } = data.content_block {
                            current_tool = Some((id, name, String::new()));
                        }
                    }
                }
                "content_block_delta" => {
                    if let Ok(data) = serde_json::from_str::<ContentBlockDelta>(&event_data) {
                        match data.delta {
                            DeltaType::TextDelta { text } => acc.text.push_str(&text),
                            DeltaType::ThinkingDelta { thinking } => acc.thinking.push_str(&thinking),
                            DeltaType::InputJsonDelta { partial_json } => {
                                if let Some((_, _, args)) = current_tool.as_mut() {
                                    args.push_str(&partial_json);
                                }
                            }
                        }
                    }
                }
                "content_block_stop" => {
                    if let Some((_, name, args)) = current_tool.take() {
                        acc.tool_uses.push((name, args));
                    }
                }
                "message_delta" => {
                    if let Ok(data) = serde_json::from_str::<MessageDelta>(&event_data) {
                        acc.stop_reason = data.delta.stop_reason;
                        if let Some(u) = data.usage {
                            acc.usage = Some(u);
                        }
                    }
                }
                "message_stop" => {}
                "error" => {
                    if let Ok(data) = serde_json::from_str::<ErrorEvent>(&event_data) {
                        return Err(LlmError::StreamError(data.error.message));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(acc)
}

fn finish_reason_from(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("max_tokens") => FinishReason::Length,
        Some(_) | None => FinishReason::Stop,
    }
}

// ---------------------------------------------------------------------
// CloudWithToolsProvider
// ---------------------------------------------------------------------

pub struct CloudWithToolsProvider {
    client: AnthropicClient,
}

impl CloudWithToolsProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { client: AnthropicClient::new(api_key) }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }
}

#[async_trait::async_trait]
impl Provider for CloudWithToolsProvider {
    fn name(&self) -> &str {
        "anthropic-tools"
    }

    fn models(&self) -> Vec<String> {
        MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    async fn process_message(&self, request: ProviderRequest, cancel: CancellationToken) -> LlmResult<ProviderResponse> {
        let acc = self.client.send(&request, true, cancel).await?;

        let tools_used: Vec<String> = acc.tool_uses.iter().map(|(name, _)| name.clone()).collect();
        Ok(ProviderResponse {
            text: acc.text,
            tools_used,
            extracted_tool_calls: Vec::new(),
            tokens_used: acc.usage,
            cost_estimate: None,
            finish_reason: finish_reason_from(acc.stop_reason.as_deref()),
            thinking: (!acc.thinking.is_empty()).then_some(acc.thinking),
        })
    }
}

// ---------------------------------------------------------------------
// CloudWithoutToolsProvider — same transport, text-fallback tool calls
// ---------------------------------------------------------------------

pub struct CloudWithoutToolsProvider {
    client: AnthropicClient,
}

impl CloudWithoutToolsProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { client: AnthropicClient::new(api_key) }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }
}

#[async_trait::async_trait]
impl Provider for CloudWithoutToolsProvider {
    fn name(&self) -> &str {
        "anthropic-text"
    }

    fn models(&self) -> Vec<String> {
        MODELS.iter().map(|m| m.to_string()).collect()
    }

    fn supports_tool_calling(&self) -> bool {
        false
    }

    async fn process_message(&self, request: ProviderRequest, cancel: CancellationToken) -> LlmResult<ProviderResponse> {
        let known_tools: Vec<String> = request.tools.iter().map(|t| t.name.clone()).collect();
        let acc = self.client.send(&request, false, cancel).await?;

        let (cleaned_text, extracted) = extract_tool_calls_from_text(&acc.text, &known_tools);
        Ok(ProviderResponse {
            text: cleaned_text,
            tools_used: Vec::new(),
            extracted_tool_calls: extracted,
            tokens_used: acc.usage,
            cost_estimate: None,
            finish_reason: finish_reason_from(acc.stop_reason.as_deref()),
            thinking: None,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    #[allow(dead_code)]
    index: u32,
    content_block: ContentBlockType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlockType {
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(rename = "text")]
    #[allow(dead_code)]
    Text { text: String },
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    #[allow(dead_code)]
    index: u32,
    delta: DeltaType,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum DeltaType {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
