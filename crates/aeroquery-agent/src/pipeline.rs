//! The Agent Pipeline (§4.9): the end-to-end per-turn handler. Ties the
//! safety filter, query analyzer, orchestrator, token budgeter, session
//! manager, cache, cost tracker, health monitor and LLM provider together
//! into one `handle_turn` call.
//!
//! Steps below are numbered to match the component design doc. Step 9
//! (classification) runs ahead of step 8 (cache lookup) in this
//! implementation because the cache's freshness policy is itself a
//! function of the classification — the two are behaviorally independent
//! so the reorder changes nothing observable.

use aeroquery_core::cache::{effective_ttl, Cache, QueryFreshness};
use aeroquery_core::error::log_error;
use aeroquery_core::orchestrator::{ExecutionPlan, Orchestrator, OrchestratorConfig, PlannedToolCall, ToolExecutor};
use aeroquery_core::query_analyzer::{ClassificationResult, Intent, QueryAnalyzer, TimeRange};
use aeroquery_core::safety::SafetyFilter;
use aeroquery_core::{CostTracker, Error, HealthMonitor, Message, PersonalInfo, Role, SessionSnapshot, Turn, UploadedDocument};
use aeroquery_llm::{FinishReason, Provider, ProviderRequest};
use aeroquery_tools::ToolRegistry;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::budget::TokenBudgeter;
use crate::session::{SessionKey, SessionManager};

const CACHE_NAMESPACE: &str = "agent_response";
const MAX_MESSAGE_BYTES: usize = 500 * 1024;
const CONTINUATION_MARKER: &str = "\n\n---\n*This response was incomplete — ask me to continue for more.*";

#[derive(Clone, Debug)]
pub enum LocationSource {
    Gps { latitude: f64, longitude: f64 },
    Ip { ip_address: String },
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: SessionKey,
    pub style: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub location_data: Option<LocationSource>,
}

impl ChatRequest {
    pub fn new(session_id: SessionKey, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id,
            style: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            location_data: None,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub tools_used: Vec<String>,
    pub tokens_used: u32,
    pub cost_estimate: f64,
    pub cached: bool,
    pub finish_reason: FinishReason,
    pub truncated: bool,
    pub requires_continuation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_tokens: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct AgentPipelineConfig {
    pub model: String,
    /// §4.9 step 15: responses longer than this are truncated with a
    /// continuation marker.
    pub max_response_chars: usize,
    /// §4.6 loop detection window, in prior user messages.
    pub loop_window: usize,
    /// §5 "a global per-turn deadline (default 120s) applies from HTTP
    /// ingress to response".
    pub turn_deadline: Duration,
    /// Tool-call retry budget handed to the orchestrator (Open Question
    /// (a); overridable via `AEROQUERY_TOOL_MAX_RETRIES`).
    pub tool_max_retries: usize,
}

impl Default for AgentPipelineConfig {
    fn default() -> Self {
        Self {
            model: "mock-deterministic".to_string(),
            max_response_chars: 6000,
            loop_window: 8,
            turn_deadline: Duration::from_secs(120),
            tool_max_retries: OrchestratorConfig::default().max_retries,
        }
    }
}

pub struct AgentPipeline {
    sessions: Arc<SessionManager>,
    tool_registry: Arc<ToolRegistry>,
    cache: Arc<dyn Cache>,
    cost_tracker: Arc<CostTracker>,
    health: Arc<HealthMonitor>,
    provider: Arc<dyn Provider>,
    orchestrator: Orchestrator,
    budgeter: TokenBudgeter,
    safety: SafetyFilter,
    analyzer: QueryAnalyzer,
    config: AgentPipelineConfig,
}

impl AgentPipeline {
    pub fn new(
        sessions: Arc<SessionManager>,
        tool_registry: Arc<ToolRegistry>,
        cache: Arc<dyn Cache>,
        cost_tracker: Arc<CostTracker>,
        health: Arc<HealthMonitor>,
        provider: Arc<dyn Provider>,
        config: AgentPipelineConfig,
    ) -> Self {
        let orchestrator_config =
            OrchestratorConfig { max_retries: config.tool_max_retries, ..OrchestratorConfig::default() };
        let orchestrator = Orchestrator::new(tool_registry.clone() as Arc<dyn ToolExecutor>, orchestrator_config);
        Self {
            sessions,
            tool_registry,
            cache,
            cost_tracker,
            health,
            provider,
            orchestrator,
            budgeter: TokenBudgeter::default(),
            safety: SafetyFilter::default(),
            analyzer: QueryAnalyzer::new(),
            config,
        }
    }

    /// Runs one full turn. Never propagates an error to the caller — every
    /// failure below the provider layer is converted to a user-facing
    /// message before this returns (§4.9 "Failure semantics").
    pub async fn handle_turn(&self, request: ChatRequest) -> ChatResponse {
        let started = std::time::Instant::now();
        let response = match tokio::time::timeout(self.config.turn_deadline, self.run_turn(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.health.record_error("agent_pipeline");
                log_error(&err, &Default::default());
                self.error_response(err)
            }
            Err(_) => {
                self.health.record_error("agent_pipeline");
                self.timeout_response()
            }
        };
        self.health.record_response_time("chat", started.elapsed().as_millis() as u64);
        response
    }

    async fn run_turn(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let cancel = CancellationToken::new();
        let session_id = request.session_id.clone();

        // 1. Sanitize input.
        let (mut text, _finding) = self
            .safety
            .sanitize_input(&request.message)
            .map_err(Error::security_critical)?;
        if let Some(aeroquery_core::SafetyFinding::PromptInjection { family, rewritten_query }) =
            self.safety.detect_prompt_injection(&text)
        {
            let mut context = aeroquery_core::error::ErrorContext::new();
            context.insert("family".to_string(), family.to_string());
            log_error(
                &Error::PromptInjection { original: text.clone(), rewritten: rewritten_query.clone() },
                &context,
            );
            text = rewritten_query;
        }

        // 2. Token validation.
        if text.trim().is_empty() {
            return Err(Error::input_invalid("message must not be empty"));
        }
        self.budgeter.validate_input_size(&text, MAX_MESSAGE_BYTES)?;

        let snapshot = self.sessions.get_or_create(&session_id).await;

        // 3. GPS short-circuit.
        if let Some(LocationSource::Gps { latitude, longitude }) = request.location_data {
            if mentions_current_location(&text) {
                return Ok(self.handle_gps_shortcut(&session_id, &text, latitude, longitude, cancel.clone()).await);
            }
        }

        // 4. Consent synthesis.
        if let Some(rewritten) = synthesize_consent(&snapshot, &text) {
            text = rewritten;
        }

        // 5. Cost gate.
        let (ok, reason) = self.cost_tracker.check_limits();
        if !ok {
            return Err(Error::CostExceeded { reason: reason.unwrap_or_else(|| "daily budget exhausted".to_string()) });
        }

        // 9. Classification (moved up; see module doc comment).
        let classification = self.analyzer.classify(&text);

        // 6. Personal-info recall / storage.
        if let Some(signal) = classification.personal_info.clone() {
            if signal.sharing {
                let update = PersonalInfo { name: signal.name, location: signal.location };
                self.sessions.set_personal_info(&session_id, &update).await;
            } else {
                let answer = self.recall_personal_info_answer(&session_id, &snapshot).await;
                return Ok(self.wrap_up(&session_id, &text, answer, Vec::new(), FinishReason::Stop, false, None, None).await);
            }
        }

        // 7. Loop check.
        if self.detect_loop(&snapshot, &text) {
            return Err(Error::LoopDetected);
        }

        // 8. Cache lookup.
        let freshness = freshness_for(&classification);
        let cache_key = self.cache_key(&request.style, &text);
        if classification.intent != Intent::PersonalInfo {
            if let Some(cached_value) = self.cache.get_fresh(CACHE_NAMESPACE, &cache_key, freshness).await {
                if let Some(cached_text) = cached_value.as_str() {
                    return Ok(
                        self.wrap_up(&session_id, &text, cached_text.to_string(), Vec::new(), FinishReason::Stop, true, None, None)
                            .await,
                    );
                }
            }
        }

        // 10. Proactive tool planning.
        let plan = self.orchestrator.plan(&classification, &text, &self.analyzer);
        let mut tools_used: Vec<String> = Vec::new();
        let context_injection = if plan.is_empty() {
            None
        } else {
            let result = self.orchestrator.execute(plan, cancel.clone()).await;
            tools_used.extend(result.tools_used.iter().cloned());
            if result.context_injection.is_empty() {
                None
            } else {
                Some(result.context_injection)
            }
        };

        // 11. Document context.
        let documents = self.sessions.documents(&session_id).await;
        let message_with_docs = prepend_document_previews(&text, &documents);

        // 12. History optimization.
        let (optimized_turns, opt_meta) = self.budgeter.optimize(&snapshot.turns, &self.config.model);
        let history: Vec<Message> = optimized_turns.iter().map(turn_to_message).collect();

        let mut system = String::from(SYSTEM_PREAMBLE);
        if !snapshot.summary.text.is_empty() {
            system.push_str("\n\nConversation summary: ");
            system.push_str(&snapshot.summary.text);
        }
        if let Some(injection) = &context_injection {
            system.push_str("\n\n");
            system.push_str(injection);
        }

        // 13. LLM call.
        let mut provider_request = ProviderRequest::new(self.config.model.clone(), message_with_docs.clone());
        provider_request.history = history;
        provider_request.system = Some(system.clone());
        provider_request.tools = self.tool_registry.definitions();
        provider_request.temperature = request.temperature;
        provider_request.top_p = request.top_p;
        provider_request.top_k = request.top_k;
        if let Some(max_tokens) = request.max_tokens {
            provider_request.max_tokens = Some(max_tokens);
        }

        let mut provider_response =
            self.provider.process_message(provider_request.clone(), cancel.clone()).await.map_err(Error::from)?;

        if !provider_response.extracted_tool_calls.is_empty() {
            let mut followup_history = provider_request.history.clone();
            followup_history.push(Message::user(message_with_docs.clone()));
            let mut assistant_message = Message::assistant(provider_response.text.clone());
            assistant_message.tool_calls = Some(provider_response.extracted_tool_calls.clone());
            followup_history.push(assistant_message);

            for call in &provider_response.extracted_tool_calls {
                let args: serde_json::Value = serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
                let outcome = self.tool_registry.call(&call.name, args, cancel.clone()).await;
                let content = match outcome {
                    Ok(value) => value.to_string(),
                    Err(e) => format!("tool call failed: {e}"),
                };
                followup_history.push(Message::tool_result(call.id.clone(), content));
                tools_used.push(call.name.clone());
            }

            let mut followup_request =
                ProviderRequest::new(self.config.model.clone(), "Continue using the tool results above.".to_string());
            followup_request.history = followup_history;
            followup_request.system = Some(system);
            provider_response = self.provider.process_message(followup_request, cancel.clone()).await.map_err(Error::from)?;
        }

        tools_used.extend(provider_response.tools_used.iter().cloned());

        let usage = provider_response.tokens_used.as_ref();
        let tokens_used = usage.map(|u| u.input_tokens + u.output_tokens).unwrap_or(0);
        let cost_estimate = provider_response.cost_estimate.unwrap_or(0.0);
        self.cost_tracker.track(tokens_used as u64, (cost_estimate * 1000.0) as u64);

        let skip_cache = tools_used.iter().any(|t| t == "search_web");
        let cache_write = if skip_cache { None } else { Some((cache_key, freshness)) };

        let response = self
            .wrap_up(
                &session_id,
                &text,
                provider_response.text.clone(),
                tools_used,
                provider_response.finish_reason,
                false,
                cache_write,
                Some((tokens_used, cost_estimate)),
            )
            .await;

        Ok(ChatResponse { memory_tokens: Some(opt_meta.final_tokens), ..response })
    }

    // -------------------------------------------------------------
    // Step 3 — GPS short-circuit.
    // -------------------------------------------------------------

    async fn handle_gps_shortcut(
        &self,
        session_id: &SessionKey,
        user_text: &str,
        latitude: f64,
        longitude: f64,
        cancel: CancellationToken,
    ) -> ChatResponse {
        let plan: ExecutionPlan = vec![PlannedToolCall::new("get_openmeteo_current_air_quality", 100)
            .with_arg("latitude", serde_json::json!(latitude))
            .with_arg("longitude", serde_json::json!(longitude))];
        let result = self.orchestrator.execute(plan, cancel).await;
        let text = match result.results.get("get_openmeteo_current_air_quality") {
            Some(value) => format_gps_air_quality(value, latitude, longitude),
            None => "I couldn't retrieve air quality for your current location just now.".to_string(),
        };
        self.wrap_up(
            session_id,
            user_text,
            text,
            vec!["get_openmeteo_current_air_quality".to_string()],
            FinishReason::Stop,
            false,
            None,
            None,
        )
        .await
    }

    // -------------------------------------------------------------
    // Step 6 — personal-info recall.
    // -------------------------------------------------------------

    async fn recall_personal_info_answer(&self, session_id: &SessionKey, snapshot: &SessionSnapshot) -> String {
        let mut info = self.sessions.personal_info(session_id).await;
        for turn in snapshot.turns.iter().filter(|t| t.role == Role::User) {
            if let Some(signal) = self.analyzer.classify(&turn.content).personal_info {
                if signal.sharing {
                    if signal.name.is_some() {
                        info.name = signal.name;
                    }
                    if signal.location.is_some() {
                        info.location = signal.location;
                    }
                }
            }
        }
        match (&info.name, &info.location) {
            (Some(name), Some(location)) => format!("Your name is {name}, and you told me you're based in {location}."),
            (Some(name), None) => format!("Your name is {name}."),
            (None, Some(location)) => format!("You told me you're based in {location}."),
            (None, None) => {
                "I don't have that saved yet — feel free to tell me your name or where you're based.".to_string()
            }
        }
    }

    // -------------------------------------------------------------
    // Step 7 — loop detection.
    // -------------------------------------------------------------

    fn detect_loop(&self, snapshot: &SessionSnapshot, text: &str) -> bool {
        let window = self.config.loop_window;
        let recent_user = snapshot.recent_user_messages(window);

        let exact_repeats = recent_user.iter().filter(|m| **m == text).count();
        if exact_repeats >= 3 {
            return true;
        }

        let overlap_hits = recent_user.iter().filter(|m| jaccard_overlap(text, m) >= 0.8).count();
        if overlap_hits >= 3 {
            return true;
        }

        let recent_assistant = snapshot.recent_assistant_messages(3);
        if recent_assistant.len() >= 3 {
            let signatures: Vec<String> =
                recent_assistant.iter().map(|m| m.chars().take(50).collect::<String>()).collect();
            if !signatures[0].is_empty() && signatures.iter().all(|s| s == &signatures[0]) {
                return true;
            }
        }

        false
    }

    fn cache_key(&self, style: &Option<String>, text: &str) -> String {
        let normalized = text.trim().to_lowercase();
        aeroquery_core::cache::hash_params(&[
            ("message", normalized.as_str()),
            ("style", style.as_deref().unwrap_or("general")),
        ])
    }

    // -------------------------------------------------------------
    // Shared tail: safety filter, continuation marker, cache write,
    // session persistence, response assembly (§4.9 steps 14-18).
    // -------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn wrap_up(
        &self,
        session_id: &SessionKey,
        user_text: &str,
        raw_text: String,
        mut tools_used: Vec<String>,
        finish_reason: FinishReason,
        cached: bool,
        cache_write: Option<(String, QueryFreshness)>,
        usage: Option<(u32, f64)>,
    ) -> ChatResponse {
        let (mut text, _finding) = self.safety.filter_response(&raw_text);

        let mut truncated = finish_reason == FinishReason::Length;
        if text.chars().count() > self.config.max_response_chars {
            truncated = true;
            text = truncate_chars(&text, self.config.max_response_chars);
        }
        if truncated {
            text.push_str(CONTINUATION_MARKER);
        }

        if let Some((key, freshness)) = cache_write {
            self.cache
                .set(CACHE_NAMESPACE, &key, serde_json::json!(text), effective_ttl(freshness, chrono::Utc::now()))
                .await;
        }

        let user_tokens = TokenBudgeter::count_tokens(user_text);
        let assistant_tokens = TokenBudgeter::count_tokens(&text);
        self.sessions
            .append_turn(session_id, user_text.to_string(), user_tokens, text.clone(), tools_used.clone(), assistant_tokens, truncated)
            .await;

        tools_used.sort();
        tools_used.dedup();

        let (tokens_used, cost_estimate) = usage.unwrap_or(((user_tokens + assistant_tokens) as u32, 0.0));

        ChatResponse {
            response: text,
            tools_used,
            tokens_used,
            cost_estimate,
            cached,
            finish_reason,
            truncated,
            requires_continuation: truncated,
            chart_result: None,
            memory_tokens: None,
        }
    }

    fn error_response(&self, err: Error) -> ChatResponse {
        let finish_reason = match err.category() {
            aeroquery_core::Category::Provider | aeroquery_core::Category::Internal => FinishReason::Error,
            _ => FinishReason::Stop,
        };
        ChatResponse {
            response: err.user_message(),
            tools_used: Vec::new(),
            tokens_used: 0,
            cost_estimate: 0.0,
            cached: false,
            finish_reason,
            truncated: false,
            requires_continuation: false,
            chart_result: None,
            memory_tokens: None,
        }
    }

    fn timeout_response(&self) -> ChatResponse {
        ChatResponse {
            response: "That took longer than expected. Please try again.".to_string(),
            tools_used: Vec::new(),
            tokens_used: 0,
            cost_estimate: 0.0,
            cached: false,
            finish_reason: FinishReason::Error,
            truncated: false,
            requires_continuation: false,
            chart_result: None,
            memory_tokens: None,
        }
    }
}

const SYSTEM_PREAMBLE: &str = "You are an assistant specialized in air quality, weather and environmental \
health. Answer concisely, cite data sources when you use retrieved data, and recommend practical health \
guidance where relevant.";

fn freshness_for(classification: &ClassificationResult) -> QueryFreshness {
    match classification.intent {
        Intent::Forecast => QueryFreshness::Forecast,
        Intent::AirQualityData if classification.time_range == TimeRange::Current => QueryFreshness::ExplicitCurrent,
        Intent::AirQualityData | Intent::Comparison | Intent::TrendAnalysis => QueryFreshness::GeneralAirQuality,
        _ => QueryFreshness::Conversational,
    }
}

fn turn_to_message(turn: &Turn) -> Message {
    match turn.role {
        Role::User => Message::user(turn.content.clone()),
        Role::Assistant => Message::assistant(turn.content.clone()),
        Role::System => Message::system(turn.content.clone()),
        Role::Tool => Message::tool_result(String::new(), turn.content.clone()),
    }
}

fn prepend_document_previews(text: &str, documents: &[UploadedDocument]) -> String {
    if documents.is_empty() {
        return text.to_string();
    }
    let mut out = String::from("Uploaded documents available in this session:\n");
    for doc in documents {
        out.push_str(&format!("--- {} ({:?}) ---\n{}\n", doc.filename, doc.file_type, doc.content_preview));
    }
    out.push_str("--- end of documents ---\n\n");
    out.push_str(text);
    out
}

fn format_gps_air_quality(value: &serde_json::Value, lat: f64, lon: f64) -> String {
    let aqi = value.get("aqi").and_then(|v| v.as_f64());
    let pm25 = value.get("pm25").and_then(|v| v.as_f64());
    let pm10 = value.get("pm10").and_then(|v| v.as_f64());
    match (aqi, pm25, pm10) {
        (Some(aqi), Some(pm25), Some(pm10)) => format!(
            "Near your current location ({lat:.3}, {lon:.3}): AQI {aqi:.0}, PM2.5 {pm25:.1} µg/m³, PM10 {pm10:.1} µg/m³ (source: open-meteo)."
        ),
        _ => format!(
            "I found partial air quality data for your current location ({lat:.3}, {lon:.3}), but some readings were unavailable."
        ),
    }
}

fn mentions_current_location(text: &str) -> bool {
    current_location_pattern().is_match(&text.to_lowercase())
}

fn current_location_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\bmy location\b|\bhere\b|\bcurrent location\b|\bwhere i am\b").unwrap())
}

fn synthesize_consent(snapshot: &SessionSnapshot, text: &str) -> Option<String> {
    let last_assistant = snapshot.recent_assistant_messages(1);
    let asked_for_location = last_assistant
        .last()
        .map(|m| location_request_pattern().is_match(&m.to_lowercase()))
        .unwrap_or(false);
    if !asked_for_location {
        return None;
    }

    let word_count = text.split_whitespace().count();
    if word_count > 5 || text.contains('?') {
        return None;
    }

    let lower = text.to_lowercase();
    if consent_words().iter().any(|w| lower.contains(w)) {
        Some("User has consented. Get air quality for current location via IP lookup.".to_string())
    } else {
        None
    }
}

fn location_request_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"your (current )?location|where are you|share your location|your city").unwrap())
}

fn consent_words() -> &'static [&'static str] {
    &["yes", "yeah", "yep", "sure", "ok", "okay", "please", "go ahead", "correct"]
}

fn jaccard_overlap(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

fn truncate_chars(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        s.chars().take(n).collect()
    }
}
