//! The orchestrator (§4.5): plans a dependency-aware tool graph from a
//! classification, executes it in parallel batches with per-tool retry,
//! fallback cascades and circuit breakers, then shapes the results into a
//! context-injection block for the LLM system preamble.

use crate::query_analyzer::{ClassificationResult, Intent, TimeRange, ToolCapability};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------
// Tool executor abstraction — implemented by aeroquery-tools' ToolRegistry.
// Kept here, not re-exported from there, so the orchestration core has no
// dependency on the tools crate.
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ExecError {
    Timeout,
    NotFound,
    Failed(String),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Timeout => write!(f, "timed out"),
            ExecError::NotFound => write!(f, "tool not found"),
            ExecError::Failed(m) => write!(f, "{}", m),
        }
    }
}

#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke `name` with `args`. Implementors enforce their own declared
    /// per-tool timeout and honor `cancel`.
    async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ExecError>;
}

// ---------------------------------------------------------------------
// ToolCall domain model
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedToolCall {
    pub name: String,
    pub arguments: HashMap<String, serde_json::Value>,
    pub priority: i32,
    pub depends_on: HashSet<String>,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl PlannedToolCall {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            arguments: HashMap::new(),
            priority,
            depends_on: HashSet::new(),
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            duration_ms: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    pub fn depending_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }
}

pub type ExecutionPlan = Vec<PlannedToolCall>;
pub type Batch = Vec<usize>;

// ---------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_timeout: Duration::from_secs(300) }
    }
}

/// Per-tool breaker state. Once `failures >= threshold`, the breaker is
/// open until `open_timeout` has elapsed since `last_failure`; after that,
/// exactly one probe call is allowed through — success resets, failure
/// re-opens with a fresh timestamp.
#[derive(Debug)]
pub struct CircuitBreakerState {
    failures: AtomicU32,
    last_failure_ms: std::sync::atomic::AtomicI64,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self { failures: AtomicU32::new(0), last_failure_ms: std::sync::atomic::AtomicI64::new(0) }
    }
}

impl CircuitBreakerState {
    fn is_open(&self, config: &CircuitBreakerConfig) -> bool {
        let failures = self.failures.load(Ordering::Relaxed);
        if failures < config.failure_threshold {
            return false;
        }
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        let elapsed_ms = chrono::Utc::now().timestamp_millis() - last;
        (elapsed_ms as u64) < config.open_timeout.as_millis() as u64
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------
// Orchestration result
// ---------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub results: HashMap<String, serde_json::Value>,
    pub errors: HashMap<String, String>,
    pub total_duration_ms: u64,
    pub context_injection: String,
    pub tools_used: Vec<String>,
}

// ---------------------------------------------------------------------
// Orchestrator config + fallback cascades
// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub enable_fallbacks: bool,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            // Latency-favoring default; the design allows up to 3 on
            // reliability-sensitive deployments (see DESIGN.md Open
            // Question (a)).
            max_retries: 1,
            retry_base_delay: Duration::from_millis(500),
            enable_fallbacks: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

fn fallback_chain(tool: &str) -> &'static [&'static str] {
    match tool {
        "get_african_city_air_quality" => &[
            "get_city_air_quality",
            "get_openmeteo_current_air_quality",
            "search_web",
            "get_seasonal_context",
        ],
        "get_city_air_quality" => &["get_openmeteo_current_air_quality", "search_web", "get_seasonal_context"],
        "search_web" => &["scrape_website"],
        _ => &[],
    }
}

/// Adapts a failed tool's arguments for its fallback. Default is
/// passthrough; city-keyed tools falling back to a coordinate-keyed tool
/// need a city→coords adapter, which in this implementation is approximated
/// by leaving `city` in place — `get_openmeteo_current_air_quality`'s stub
/// implementation accepts either `city` or `latitude`/`longitude`.
fn adapt_arguments(
    _from: &str,
    _to: &str,
    args: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    args.clone()
}

pub struct Orchestrator {
    executor: Arc<dyn ToolExecutor>,
    config: OrchestratorConfig,
    breakers: DashMap<String, Arc<CircuitBreakerState>>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn ToolExecutor>, config: OrchestratorConfig) -> Self {
        Self { executor, config, breakers: DashMap::new() }
    }

    fn breaker(&self, tool: &str) -> Arc<CircuitBreakerState> {
        self.breakers.entry(tool.to_string()).or_insert_with(|| Arc::new(CircuitBreakerState::default())).clone()
    }

    // -------------------------------------------------------------
    // Planning (§4.5 "Planning")
    // -------------------------------------------------------------

    pub fn plan(&self, classification: &ClassificationResult, raw_query: &str, analyzer: &crate::query_analyzer::QueryAnalyzer) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new();

        for location in &classification.locations {
            let (tool_name, base_priority) = if location.is_african {
                ("get_african_city_air_quality", 100)
            } else {
                ("get_city_air_quality", 90)
            };
            let capability = capability_for(tool_name);
            let relevance = analyzer.tool_relevance(&capability, classification);
            let priority = (base_priority as f32 * relevance).round() as i32;
            plan.push(
                PlannedToolCall::new(tool_name, priority)
                    .with_arg("city", serde_json::json!(location.name)),
            );

            if classification.time_range == TimeRange::Forecast {
                plan.push(
                    PlannedToolCall::new("get_weather_forecast", (80.0 * relevance).round() as i32)
                        .with_arg("city", serde_json::json!(location.name))
                        .with_arg("days", serde_json::json!(3)),
                );
            }
        }

        let needs_web_fallback = classification.time_range == TimeRange::Historical
            || (classification.locations.is_empty() && classification.needs_external_data);
        if needs_web_fallback {
            plan.push(PlannedToolCall::new("search_web", 60).with_arg("query", serde_json::json!(raw_query)));
        }

        plan
    }

    // -------------------------------------------------------------
    // Dependency batching (Kahn-like layering)
    // -------------------------------------------------------------

    pub fn batch(&self, plan: &ExecutionPlan) -> Vec<Batch> {
        let mut remaining: HashSet<usize> = (0..plan.len()).collect();
        let mut done: HashSet<String> = HashSet::new();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let mut next: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| plan[i].depends_on.iter().all(|d| done.contains(d)))
                .collect();

            if next.is_empty() {
                tracing::warn!("orchestrator: dependency cycle or stuck remainder, falling back to a single sequential batch");
                let mut rest: Vec<usize> = remaining.into_iter().collect();
                rest.sort_by_key(|&i| std::cmp::Reverse(plan[i].priority));
                for &i in &rest {
                    batches.push(vec![i]);
                }
                return batches;
            }

            next.sort_by_key(|&i| std::cmp::Reverse(plan[i].priority));
            for &i in &next {
                remaining.remove(&i);
                done.insert(plan[i].name.clone());
            }
            batches.push(next);
        }

        batches
    }

    // -------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------

    pub async fn execute(&self, mut plan: ExecutionPlan, cancel: CancellationToken) -> OrchestrationResult {
        let start = Instant::now();
        let batches = self.batch(&plan);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        for batch in batches {
            let mut handles = Vec::new();
            for idx in batch {
                let call = plan[idx].clone();
                let sem = semaphore.clone();
                let executor = self.executor.clone();
                let breaker = self.breaker(&call.name);
                let breakers = &self.breakers;
                let fallback_breakers: Vec<(String, Arc<CircuitBreakerState>)> = fallback_chain(&call.name)
                    .iter()
                    .map(|t| (t.to_string(), breakers.entry(t.to_string()).or_insert_with(|| Arc::new(CircuitBreakerState::default())).clone()))
                    .collect();
                let config = self.config.clone();
                let cancel = cancel.clone();

                handles.push(async move {
                    let _permit = sem.acquire_owned().await;
                    let attempt_start = Instant::now();
                    let outcome = run_with_retry_and_fallback(
                        executor.as_ref(),
                        &call,
                        &breaker,
                        &fallback_breakers,
                        &config,
                        cancel,
                    )
                    .await;
                    (idx, outcome, attempt_start.elapsed())
                });
            }

            let results = futures::future::join_all(handles).await;
            for (idx, outcome, elapsed) in results {
                plan[idx].duration_ms = Some(elapsed.as_millis() as u64);
                match outcome {
                    Ok((result_value, used_tool, retries)) => {
                        plan[idx].status = ToolCallStatus::Success;
                        plan[idx].result = Some(result_value);
                        plan[idx].retry_count = retries;
                        if used_tool != plan[idx].name {
                            plan[idx].arguments.insert("__resolved_via".into(), serde_json::json!(used_tool));
                        }
                    }
                    Err((error_message, retries, skipped)) => {
                        plan[idx].status = if skipped { ToolCallStatus::Skipped } else { ToolCallStatus::Failed };
                        plan[idx].error = Some(error_message);
                        plan[idx].retry_count = retries;
                    }
                }
            }
        }

        shape_results(plan, start.elapsed())
    }
}

/// Runs one planned call through retry-then-fallback. Returns either
/// `(value, tool_name_that_succeeded, retries)` or `(error, retries, was_skipped)`.
async fn run_with_retry_and_fallback(
    executor: &dyn ToolExecutor,
    call: &PlannedToolCall,
    breaker: &CircuitBreakerState,
    fallback_breakers: &[(String, Arc<CircuitBreakerState>)],
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Result<(serde_json::Value, String, u32), (String, u32, bool)> {
    if breaker.is_open(&config.circuit_breaker) {
        if !config.enable_fallbacks || fallback_chain(&call.name).is_empty() {
            return Err((format!("circuit open for '{}'", call.name), 0, true));
        }
    } else if let Some(Ok((value, retries))) =
        try_with_retries(executor, &call.name, &call.arguments, breaker, config, cancel.clone()).await
    {
        return Ok((value, call.name.clone(), retries));
    }

    if !config.enable_fallbacks {
        return Err((format!("tool '{}' failed and fallbacks are disabled", call.name), config.max_retries as u32, false));
    }

    for (fallback_name, fallback_breaker) in fallback_breakers {
        if fallback_breaker.is_open(&config.circuit_breaker) {
            continue;
        }
        let adapted = adapt_arguments(&call.name, fallback_name, &call.arguments);
        if let Some(Ok((value, retries))) =
            try_with_retries(executor, fallback_name, &adapted, fallback_breaker, config, cancel.clone()).await
        {
            return Ok((value, fallback_name.clone(), retries));
        }
    }

    Err((format!("tool '{}' and all fallbacks failed", call.name), config.max_retries as u32, false))
}

/// Attempts a single tool (by name) with bounded retries and exponential
/// backoff. Returns `None` only when the breaker was already open and no
/// attempt was made; otherwise `Some(Ok(..))` / `Some(Err(..))`.
async fn try_with_retries(
    executor: &dyn ToolExecutor,
    name: &str,
    args: &HashMap<String, serde_json::Value>,
    breaker: &CircuitBreakerState,
    config: &OrchestratorConfig,
    cancel: CancellationToken,
) -> Option<Result<(serde_json::Value, u32), (String, u32, bool)>> {
    let args_value = serde_json::Value::Object(args.iter().map(|(k, v)| (k.clone(), v.clone())).collect());

    for attempt in 0..=config.max_retries {
        match executor.call(name, args_value.clone(), cancel.clone()).await {
            Ok(value) => {
                if is_structured_failure(&value) {
                    breaker.record_failure();
                } else {
                    breaker.record_success();
                    return Some(Ok((value, attempt as u32)));
                }
            }
            Err(_) => breaker.record_failure(),
        }

        if attempt < config.max_retries {
            let delay = config.retry_base_delay * 2u32.pow(attempt as u32);
            tokio::time::sleep(delay).await;
        }
    }

    Some(Err((format!("'{}' failed after {} attempt(s)", name, config.max_retries + 1), config.max_retries as u32, false)))
}

fn is_structured_failure(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .map(|o| {
            matches!(o.get("success"), Some(serde_json::Value::Bool(false)))
                || o.get("error").map(|e| !e.is_null()).unwrap_or(false)
        })
        .unwrap_or(false)
}

fn capability_for(tool_name: &str) -> ToolCapability {
    match tool_name {
        "get_african_city_air_quality" => ToolCapability { africa_specialist: true, realtime: true, historical: false, base_confidence: 0.9 },
        "get_city_air_quality" => ToolCapability { africa_specialist: false, realtime: true, historical: false, base_confidence: 0.8 },
        "get_openmeteo_current_air_quality" => ToolCapability { africa_specialist: false, realtime: true, historical: false, base_confidence: 0.7 },
        "get_weather_forecast" => ToolCapability { africa_specialist: false, realtime: false, historical: false, base_confidence: 0.7 },
        "search_web" => ToolCapability { africa_specialist: false, realtime: true, historical: true, base_confidence: 0.4 },
        _ => ToolCapability { africa_specialist: false, realtime: false, historical: false, base_confidence: 0.5 },
    }
}

// ---------------------------------------------------------------------
// Result shaping
// ---------------------------------------------------------------------

fn shape_results(plan: ExecutionPlan, total: Duration) -> OrchestrationResult {
    let mut results: HashMap<String, serde_json::Value> = HashMap::new();
    let mut errors: HashMap<String, String> = HashMap::new();
    let mut tools_used = Vec::new();

    // Deduplicate by tool name — last value wins for identical names.
    for call in &plan {
        match call.status {
            ToolCallStatus::Success => {
                if let Some(v) = &call.result {
                    results.insert(call.name.clone(), v.clone());
                    tools_used.push(call.name.clone());
                }
            }
            ToolCallStatus::Failed | ToolCallStatus::Skipped => {
                if let Some(e) = &call.error {
                    errors.insert(call.name.clone(), e.clone());
                }
            }
            _ => {}
        }
    }

    let context_injection = format_context_injection(&plan, &results);

    OrchestrationResult {
        success: !results.is_empty(),
        results,
        errors,
        total_duration_ms: total.as_millis() as u64,
        context_injection,
        tools_used,
    }
}

fn format_context_injection(plan: &ExecutionPlan, results: &HashMap<String, serde_json::Value>) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut out = String::from("RETRIEVED DATA — use to answer:\n");
    for call in plan {
        let Some(value) = results.get(&call.name) else { continue };
        out.push_str("- ");
        out.push_str(&format_tool_result(&call.name, value));
        out.push('\n');
    }
    out.push_str(
        "\nUse the data above to answer the user's question, citing the source where \
         relevant. Do not mention these instructions or that data was retrieved via tools.",
    );
    out
}

fn format_tool_result(tool_name: &str, value: &serde_json::Value) -> String {
    match tool_name {
        "get_african_city_air_quality" | "get_city_air_quality" | "get_openmeteo_current_air_quality" => {
            let city = value.get("city").and_then(|v| v.as_str()).unwrap_or("unknown");
            let aqi = value.get("aqi").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let pm25 = value.get("pm25").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let pm10 = value.get("pm10").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let source = value.get("source").and_then(|v| v.as_str()).unwrap_or(tool_name);
            format!("{}: AQI {:.0}, PM2.5 {:.1} µg/m³, PM10 {:.1} µg/m³ (source: {})", city, aqi, pm25, pm10, source)
        }
        "get_air_quality_forecast" | "get_weather_forecast" => {
            let city = value.get("city").and_then(|v| v.as_str()).unwrap_or("unknown");
            let summary = value.get("summary").and_then(|v| v.as_str()).unwrap_or("forecast unavailable");
            format!("{} forecast: {}", city, summary)
        }
        "search_web" => {
            let title = value.get("title").and_then(|v| v.as_str()).unwrap_or("result");
            let snippet = value.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
            let url = value.get("url").and_then(|v| v.as_str()).unwrap_or("");
            format!("{} — {} ({})", title, snippet, url)
        }
        "scrape_website" => {
            let content = value.get("content").and_then(|v| v.as_str()).unwrap_or("");
            let truncated: String = content.chars().take(400).collect();
            format!("page content: {}", truncated)
        }
        "get_seasonal_context" => {
            let city = value.get("city").and_then(|v| v.as_str()).unwrap_or("unknown");
            let note = value.get("note").and_then(|v| v.as_str()).unwrap_or("");
            format!("{} seasonal estimate: {}", city, note)
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyExecutor {
        fail_names: HashSet<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ToolExecutor for FlakyExecutor {
        async fn call(&self, name: &str, args: serde_json::Value, _cancel: CancellationToken) -> Result<serde_json::Value, ExecError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_names.contains(name) {
                return Err(ExecError::Failed("forced failure".into()));
            }
            let city = args.get("city").cloned().unwrap_or(serde_json::json!("?"));
            Ok(serde_json::json!({"city": city, "aqi": 42, "pm25": 12.3, "pm10": 20.0, "source": name}))
        }
    }

    #[tokio::test]
    async fn fallback_cascade_succeeds_after_primary_fails() {
        let executor = Arc::new(FlakyExecutor {
            fail_names: HashSet::from(["get_african_city_air_quality", "get_city_air_quality"]),
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(executor, OrchestratorConfig { max_retries: 0, ..Default::default() });
        let plan = vec![PlannedToolCall::new("get_african_city_air_quality", 100).with_arg("city", serde_json::json!("Mwanza"))];
        let result = orchestrator.execute(plan, CancellationToken::new()).await;
        assert!(result.success);
        assert!(result.tools_used.contains(&"get_openmeteo_current_air_quality".to_string()));
    }

    #[tokio::test]
    async fn circuit_breaker_skips_after_threshold() {
        let executor = Arc::new(FlakyExecutor { fail_names: HashSet::from(["search_web"]), calls: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(
            executor,
            OrchestratorConfig { max_retries: 0, enable_fallbacks: false, circuit_breaker: CircuitBreakerConfig { failure_threshold: 2, open_timeout: Duration::from_secs(300) }, ..Default::default() },
        );
        for _ in 0..2 {
            let plan = vec![PlannedToolCall::new("search_web", 60).with_arg("query", serde_json::json!("x"))];
            orchestrator.execute(plan, CancellationToken::new()).await;
        }
        let plan = vec![PlannedToolCall::new("search_web", 60).with_arg("query", serde_json::json!("x"))];
        let result = orchestrator.execute(plan, CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result.errors.get("search_web").unwrap().contains("circuit open"));
    }

    #[tokio::test]
    async fn dedup_by_tool_name_last_value_wins() {
        let executor = Arc::new(FlakyExecutor { fail_names: HashSet::new(), calls: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
        let plan = vec![
            PlannedToolCall::new("get_city_air_quality", 90).with_arg("city", serde_json::json!("Paris")),
            PlannedToolCall::new("get_city_air_quality", 90).with_arg("city", serde_json::json!("London")),
        ];
        let result = orchestrator.execute(plan, CancellationToken::new()).await;
        assert_eq!(result.results.len(), 1);
    }

    #[test]
    fn batching_runs_independent_locations_in_one_batch() {
        let executor = Arc::new(FlakyExecutor { fail_names: HashSet::new(), calls: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
        let plan = vec![
            PlannedToolCall::new("get_african_city_air_quality", 100).with_arg("city", serde_json::json!("Nairobi")),
            PlannedToolCall::new("get_african_city_air_quality", 100).with_arg("city", serde_json::json!("Lagos")),
            PlannedToolCall::new("get_weather_forecast", 80).with_arg("city", serde_json::json!("Nairobi")),
        ];
        let batches = orchestrator.batch(&plan);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn cyclic_dependency_falls_back_to_sequential() {
        let executor = Arc::new(FlakyExecutor { fail_names: HashSet::new(), calls: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
        let mut a = PlannedToolCall::new("a", 1);
        a.depends_on.insert("b".into());
        let mut b = PlannedToolCall::new("b", 1);
        b.depends_on.insert("a".into());
        let plan = vec![a, b];
        let batches = orchestrator.batch(&plan);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn empty_plan_has_at_most_search_web() {
        let classification = crate::query_analyzer::QueryAnalyzer::new().classify("What is AQI?");
        let executor = Arc::new(FlakyExecutor { fail_names: HashSet::new(), calls: AtomicUsize::new(0) });
        let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
        let plan = orchestrator.plan(&classification, "What is AQI?", &crate::query_analyzer::QueryAnalyzer::new());
        assert!(plan.len() <= 1);
        assert!(plan.iter().all(|c| c.name == "search_web"));
    }
}
