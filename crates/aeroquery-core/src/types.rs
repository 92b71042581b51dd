//! Shared data model: session identity, chat messages, and the gateway's
//! auth/bind configuration surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session identifier, cheaply cloneable.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey(Arc<str>);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Validates the `[A-Za-z0-9_-]{4,100}` session id shape from the external
/// interface contract.
pub fn is_valid_session_id(id: &str) -> bool {
    let len = id.len();
    (4..=100).contains(&len)
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool call as seen on the LLM wire protocol (distinct from the
/// orchestrator's `PlannedToolCall`, which exists before any provider call).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ---------------------------------------------------------------------
// Session domain model (§3)
// ---------------------------------------------------------------------

/// One user/assistant exchange. Immutable after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tools_used: Vec<String>,
    pub tokens: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub truncated: bool,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, tokens: usize) -> Self {
        Self {
            role,
            content: content.into(),
            tools_used: Vec::new(),
            tokens,
            timestamp: Utc::now(),
            truncated: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Csv,
    Xlsx,
}

/// Bound to exactly one session; at most ~3 kept per session (LRU).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub filename: String,
    pub file_type: DocumentType,
    /// Size-capped preview, not the full document.
    pub content_preview: String,
    pub full_length: usize,
    pub truncated: bool,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Optional name/location the user has volunteered during the conversation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub name: Option<String>,
    pub location: Option<String>,
}

impl PersonalInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.location.is_none()
    }

    pub fn merge(&mut self, other: &PersonalInfo) {
        if other.name.is_some() {
            self.name = other.name.clone();
        }
        if other.location.is_some() {
            self.location = other.location.clone();
        }
    }
}

/// A lazily-rebuilt rolling summary of the conversation, O(300 tokens).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub text: String,
    pub built_at_turn: usize,
}

/// Read-only view of a session handed to observers (the Agent Pipeline).
/// Owned exclusively by the Session Manager; never mutated by a borrower.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub turns: Vec<Turn>,
    pub documents: Vec<UploadedDocument>,
    pub personal_info: PersonalInfo,
    pub summary: ConversationSummary,
    pub last_access: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Last `n` user messages, most recent last.
    pub fn recent_user_messages(&self, n: usize) -> Vec<&str> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .take(n)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Last `n` assistant messages, most recent last.
    pub fn recent_assistant_messages(&self, n: usize) -> Vec<&str> {
        self.turns
            .iter()
            .rev()
            .filter(|t| t.role == Role::Assistant)
            .take(n)
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

// ---------------------------------------------------------------------
// Gateway configuration
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    8089
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: default_port(), bind: BindMode::default(), auth: AuthConfig::default() }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    None,
}
