//! Tool registry and trait definitions (§4.4).
//!
//! Each tool is a self-contained module implementing the `Tool` trait.
//! `ToolRegistry` doubles as the orchestrator's `ToolExecutor`: it enforces
//! each tool's declared timeout with cancellation and maps tool-local
//! errors onto `orchestrator::ExecError` so the core has no dependency on
//! this crate.

use aeroquery_core::orchestrator::{ExecError, ToolExecutor};
use aeroquery_core::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default per-tool timeout (§4.4): 20 seconds, overridable per tool.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub enum ToolError {
    InvalidArgs(String),
    Upstream(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::InvalidArgs(m) => write!(f, "invalid arguments: {}", m),
            ToolError::Upstream(m) => write!(f, "{}", m),
        }
    }
}

pub type ToolOutcome = Result<Value, ToolError>;

/// Implement this to add a new capability (§4.4 "Execute/ExecuteAsync").
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, stable across releases (e.g. "get_city_air_quality").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM alongside the schema.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Declared timeout enforced by the registry; 20s unless overridden.
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> ToolOutcome;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Tool definitions for every registered tool, handed to the provider
    /// abstraction as the cloud-with-tools request's `tools` field.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ToolRegistry {
    async fn call(
        &self,
        name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ExecError> {
        let Some(tool) = self.get(name) else {
            return Err(ExecError::NotFound);
        };

        tokio::select! {
            result = tokio::time::timeout(tool.timeout(), tool.execute(args)) => {
                match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(ExecError::Failed(e.to_string())),
                    Err(_) => Err(ExecError::Timeout),
                }
            }
            _ = cancel.cancelled() => Err(ExecError::Failed("cancelled".to_string())),
        }
    }
}
