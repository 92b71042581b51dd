//! aeroquery-core — shared types, error taxonomy, and the orchestration
//! primitives that have no dependency on an LLM provider or a tool registry:
//! the cache (C1), safety filter (C2), query analyzer (C3), orchestrator
//! (C5), cost tracker (C10) and health monitor (C11).

pub mod cache;
pub mod cost_tracker;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod query_analyzer;
pub mod safety;
pub mod types;

pub use cache::{effective_ttl, hash_params, Cache, CacheEntry, InMemoryCache, QueryFreshness};
pub use cost_tracker::{CostLimits, CostStatus, CostTracker};
pub use error::{Category, Error, ErrorContext, Result, Severity};
pub use health::{ComponentStatus, HealthMonitor, HealthReport, ResponseTimeStats};
pub use orchestrator::{
    Batch, CircuitBreakerConfig, CircuitBreakerState, ExecutionPlan, Orchestrator,
    OrchestratorConfig, OrchestrationResult, PlannedToolCall, ToolCallStatus, ToolExecutor,
};
pub use query_analyzer::{ClassificationResult, Complexity, Intent, QueryAnalyzer, TimeRange};
pub use safety::{SafetyFilter, SafetyFinding};
pub use types::*;
