//! The Provider trait (§4.8): uniform contract over Cloud-with-tools,
//! Cloud-without-tools, Local, and Mock backends.

use crate::types::{ProviderRequest, ProviderResponse};
use tokio_util::sync::CancellationToken;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl From<LlmError> for aeroquery_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited { retry_after_ms } => aeroquery_core::Error::ProviderRateLimited { retry_after_ms },
            LlmError::Cancelled => aeroquery_core::Error::internal("provider call cancelled"),
            other => aeroquery_core::Error::ProviderUnavailable { message: other.to_string() },
        }
    }
}

/// Polymorphic over `{ProcessMessage, GetToolSchemas, Setup, Cleanup}` (§4.8).
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn models(&self) -> Vec<String>;

    fn supports_model(&self, model: &str) -> bool {
        self.models().iter().any(|m| m == model || model.starts_with(m.as_str()))
    }

    /// Whether this provider can be handed a tool schema and trusted to
    /// emit structured `tool_use` blocks itself.
    fn supports_tool_calling(&self) -> bool;

    /// Called once before the provider serves its first request.
    async fn setup(&self) -> LlmResult<()> {
        Ok(())
    }

    /// Called on shutdown; release connections/handles.
    async fn cleanup(&self) -> LlmResult<()> {
        Ok(())
    }

    async fn process_message(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> LlmResult<ProviderResponse>;
}
