//! Error taxonomy for the air-quality assistant core.
//!
//! Every error kind carries a category, a severity, a stable code and a
//! separate user-facing message so the agent pipeline can turn any internal
//! failure into something safe to show a caller without leaking internals.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Input,
    Security,
    Cost,
    Session,
    Tool,
    Provider,
    Budget,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("input invalid: {message}")]
    InputInvalid { message: String },

    #[error("security critical: {message}")]
    SecurityCritical { message: String },

    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// Non-fatal: the safety filter rewrote the message in place and
    /// execution continues with `rewritten`.
    #[error("prompt injection rewritten")]
    PromptInjection { original: String, rewritten: String },

    #[error("daily cost/token budget exceeded: {reason}")]
    CostExceeded { reason: String },

    #[error("conversation loop detected")]
    LoopDetected,

    #[error("tool '{tool}' timed out after {timeout_secs}s")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("circuit open for tool '{tool}'")]
    CircuitOpen { tool: String },

    #[error("provider rate limited, retry after {retry_after_ms}ms")]
    ProviderRateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("token budget exceeded: {used} > {limit}")]
    TokenBudgetExceeded { used: usize, limit: usize },

    #[error("context was truncated to fit the model window")]
    ContextTruncated,

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn category(&self) -> Category {
        match self {
            Error::InputInvalid { .. } => Category::Input,
            Error::SecurityCritical { .. } | Error::PromptInjection { .. } | Error::AuthFailed { .. } => {
                Category::Security
            }
            Error::CostExceeded { .. } => Category::Cost,
            Error::LoopDetected | Error::SessionNotFound(_) => Category::Session,
            Error::ToolTimeout { .. } | Error::ToolFailure { .. } | Error::CircuitOpen { .. } => {
                Category::Tool
            }
            Error::ProviderRateLimited { .. } | Error::ProviderUnavailable { .. } => {
                Category::Provider
            }
            Error::TokenBudgetExceeded { .. } | Error::ContextTruncated => Category::Budget,
            Error::Internal { .. } | Error::Io(_) | Error::Json(_) => Category::Internal,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::SecurityCritical { .. } => Severity::Critical,
            Error::CostExceeded { .. } | Error::CircuitOpen { .. } => Severity::High,
            Error::AuthFailed { .. }
            | Error::PromptInjection { .. }
            | Error::LoopDetected
            | Error::ToolTimeout { .. }
            | Error::ToolFailure { .. }
            | Error::ProviderRateLimited { .. }
            | Error::ProviderUnavailable { .. }
            | Error::TokenBudgetExceeded { .. } => Severity::Medium,
            Error::InputInvalid { .. } | Error::ContextTruncated | Error::SessionNotFound(_) => {
                Severity::Low
            }
            Error::Internal { .. } | Error::Io(_) | Error::Json(_) => Severity::High,
        }
    }

    /// A stable code suitable for surfacing in logs/support tooling. Never
    /// shown to end users as the *message*, only attached for support.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InputInvalid { .. } => "INPUT_INVALID",
            Error::SecurityCritical { .. } => "SECURITY_CRITICAL",
            Error::AuthFailed { .. } => "AUTH_FAILED",
            Error::PromptInjection { .. } => "PROMPT_INJECTION",
            Error::CostExceeded { .. } => "COST_EXCEEDED",
            Error::LoopDetected => "LOOP_DETECTED",
            Error::ToolTimeout { .. } => "TOOL_TIMEOUT",
            Error::ToolFailure { .. } => "TOOL_FAILURE",
            Error::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Error::ProviderRateLimited { .. } => "PROVIDER_RATE_LIMITED",
            Error::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Error::TokenBudgetExceeded { .. } => "TOKEN_BUDGET_EXCEEDED",
            Error::ContextTruncated => "CONTEXT_TRUNCATED",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::Internal { .. } | Error::Io(_) | Error::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// The message safe to return to the caller. Never includes stack
    /// traces, internal identifiers, or raw provider errors.
    pub fn user_message(&self) -> String {
        match self {
            Error::InputInvalid { message } => message.clone(),
            Error::SecurityCritical { .. } => {
                "I can't process that request.".to_string()
            }
            Error::AuthFailed { .. } => "Authentication required.".to_string(),
            Error::PromptInjection { rewritten, .. } => rewritten.clone(),
            Error::CostExceeded { .. } => {
                "I've reached today's usage limit. Please try again tomorrow.".to_string()
            }
            Error::LoopDetected => {
                "It looks like we're going in circles. Let me help you differently — try \
                 asking about a specific city's air quality, a forecast, or health advice."
                    .to_string()
            }
            Error::ToolTimeout { .. } | Error::ToolFailure { .. } | Error::CircuitOpen { .. } => {
                "I couldn't retrieve live data just now, but I can still help with what I know."
                    .to_string()
            }
            Error::ProviderRateLimited { .. } | Error::ProviderUnavailable { .. } => {
                "We're experiencing high demand right now. Please try again in a moment."
                    .to_string()
            }
            Error::TokenBudgetExceeded { .. } | Error::ContextTruncated => {
                "This conversation has gotten long; some older context was trimmed to keep \
                 things responsive."
                    .to_string()
            }
            Error::SessionNotFound(_) => "That session no longer exists.".to_string(),
            Error::Internal { .. } | Error::Io(_) | Error::Json(_) => {
                "Something went wrong on our end. Please try again.".to_string()
            }
        }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::InputInvalid { message: message.into() }
    }

    pub fn security_critical(message: impl Into<String>) -> Self {
        Self::SecurityCritical { message: message.into() }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed { message: message.into() }
    }

    pub fn tool_failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure { tool: tool.into(), message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

/// Free-form context attached to a logged error: component, service, session id.
/// Kept separate from `Error` itself so the error type stays cheap to construct
/// and match on; callers at the pipeline boundary fill this in when logging.
pub type ErrorContext = HashMap<String, String>;

pub fn log_error(err: &Error, context: &ErrorContext) {
    match err.severity() {
        Severity::Critical | Severity::High => {
            tracing::error!(code = err.code(), category = ?err.category(), ?context, "{}", err)
        }
        Severity::Medium => {
            tracing::warn!(code = err.code(), category = ?err.category(), ?context, "{}", err)
        }
        Severity::Low => {
            tracing::debug!(code = err.code(), category = ?err.category(), ?context, "{}", err)
        }
    }
}
