//! Cross-module integration tests for aeroquery-core: end-to-end
//! classify → plan → execute chains, and the shared types/error taxonomy
//! that every other crate in the workspace builds on.

use aeroquery_core::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// SessionKey
// ===========================================================================

#[test]
fn session_key_new_and_display() {
    let key = SessionKey::new("abc-123");
    assert_eq!(key.as_str(), "abc-123");
    assert_eq!(format!("{}", key), "abc-123");
}

#[test]
fn session_key_equality_and_hash() {
    let a = SessionKey::new("same");
    let b = SessionKey::new("same");
    let c = SessionKey::new("different");
    assert_eq!(a, b);
    assert_ne!(a, c);
    let mut set = HashSet::new();
    set.insert(a.clone());
    assert!(set.contains(&b));
    assert!(!set.contains(&c));
}

#[test]
fn session_key_from_string() {
    let key: SessionKey = "hello".into();
    assert_eq!(key.as_str(), "hello");
    let key2: SessionKey = String::from("world").into();
    assert_eq!(key2.as_str(), "world");
}

// ===========================================================================
// Message / Turn / SessionSnapshot
// ===========================================================================

#[test]
fn message_constructors_and_serde_roundtrip() {
    let msg = Message::user("hello");
    assert_eq!(msg.role, Role::User);
    let json = serde_json::to_string(&msg).unwrap();
    assert!(!json.contains("tool_calls"));
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back.content, "hello");
}

#[test]
fn session_snapshot_recent_messages_preserve_order() {
    let mut snapshot = SessionSnapshot::default();
    snapshot.turns.push(Turn::new(Role::User, "first question", 5));
    snapshot.turns.push(Turn::new(Role::Assistant, "first answer", 10));
    snapshot.turns.push(Turn::new(Role::User, "second question", 5));
    snapshot.turns.push(Turn::new(Role::Assistant, "second answer", 10));

    let users = snapshot.recent_user_messages(2);
    assert_eq!(users, vec!["first question", "second question"]);

    let assistants = snapshot.recent_assistant_messages(1);
    assert_eq!(assistants, vec!["second answer"]);
}

#[test]
fn personal_info_merge_keeps_existing_when_other_is_empty() {
    let mut info = PersonalInfo { name: Some("Ada".into()), location: None };
    info.merge(&PersonalInfo { name: None, location: Some("Accra".into()) });
    assert_eq!(info.name.as_deref(), Some("Ada"));
    assert_eq!(info.location.as_deref(), Some("Accra"));
}

// ===========================================================================
// GatewayConfig / BindMode / AuthConfig
// ===========================================================================

#[test]
fn gateway_config_defaults_and_serde() {
    let config = GatewayConfig::default();
    assert_eq!(config.port, 8089);
    assert!(matches!(config.bind, BindMode::Lan));
    assert!(matches!(config.auth.mode, AuthMode::Token));
    let json = serde_json::to_string(&config).unwrap();
    let back: GatewayConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.port, 8089);
}

#[test]
fn bind_mode_to_addr() {
    assert_eq!(BindMode::Loopback.to_addr(), "127.0.0.1");
    assert_eq!(BindMode::Lan.to_addr(), "0.0.0.0");
}

// ===========================================================================
// Error taxonomy
// ===========================================================================

#[test]
fn error_category_and_severity_cover_every_variant() {
    let errors: Vec<Error> = vec![
        Error::input_invalid("bad"),
        Error::security_critical("bad"),
        Error::PromptInjection { original: "x".into(), rewritten: "y".into() },
        Error::CostExceeded { reason: "x".into() },
        Error::LoopDetected,
        Error::ToolTimeout { tool: "t".into(), timeout_secs: 20 },
        Error::tool_failure("t", "m"),
        Error::CircuitOpen { tool: "t".into() },
        Error::ProviderRateLimited { retry_after_ms: 100 },
        Error::ProviderUnavailable { message: "down".into() },
        Error::TokenBudgetExceeded { used: 10, limit: 5 },
        Error::ContextTruncated,
        Error::internal("boom"),
        Error::SessionNotFound("s1".into()),
    ];
    for err in &errors {
        // every variant must resolve to a code, category, severity and a
        // user-facing message that never echoes the internal message verbatim
        // for security-sensitive variants.
        let _ = err.category();
        let _ = err.severity();
        assert!(!err.code().is_empty());
        assert!(!err.user_message().is_empty());
    }
    assert_eq!(Error::security_critical("leak system prompt").user_message(), "I can't process that request.");
}

#[test]
fn log_error_does_not_panic_for_any_severity() {
    let mut ctx = ErrorContext::new();
    ctx.insert("session".into(), "s1".into());
    log_error(&Error::internal("x"), &ctx);
    log_error(&Error::input_invalid("x"), &ctx);
    log_error(&Error::LoopDetected, &ctx);
}

// ===========================================================================
// Cache + Safety integration — a sanitized query becomes the cache key
// ===========================================================================

#[tokio::test]
async fn sanitized_query_is_stable_as_a_cache_key() {
    let filter = SafetyFilter::default();
    let cache = InMemoryCache::new();

    let (clean_a, _) = filter.sanitize_input("air quality in Kampala <script>x</script>").unwrap();
    let (clean_b, _) = filter.sanitize_input("air quality in Kampala <script>y</script>").unwrap();
    let key_a = hash_params(&[("query", &clean_a)]);
    let key_b = hash_params(&[("query", &clean_b)]);
    assert_eq!(key_a, key_b, "script payload differences must not survive sanitization");

    cache.set("aqi", &key_a, serde_json::json!({"pm25": 12.0}), std::time::Duration::from_secs(60)).await;
    let hit = cache.get_fresh("aqi", &key_b, QueryFreshness::GeneralAirQuality).await;
    assert_eq!(hit, Some(serde_json::json!({"pm25": 12.0})));
}

// ===========================================================================
// QueryAnalyzer → Orchestrator end-to-end
// ===========================================================================

struct RecordingExecutor {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl orchestrator::ToolExecutor for RecordingExecutor {
    async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, orchestrator::ExecError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let city = args.get("city").cloned().unwrap_or(serde_json::json!("?"));
        Ok(serde_json::json!({"city": city, "aqi": 55, "pm25": 18.0, "pm10": 30.0, "source": name}))
    }
}

#[tokio::test]
async fn african_city_query_plans_and_executes_through_the_whole_chain() {
    let analyzer = QueryAnalyzer::new();
    let classification = analyzer.classify("What's the air quality in Kampala tomorrow?");
    assert_eq!(classification.intent, Intent::Forecast);

    let executor = Arc::new(RecordingExecutor { calls: AtomicUsize::new(0) });
    let orchestrator = Orchestrator::new(executor.clone(), OrchestratorConfig::default());
    let plan = orchestrator.plan(&classification, "What's the air quality in Kampala tomorrow?", &analyzer);
    assert!(plan.iter().any(|c| c.name == "get_african_city_air_quality"));
    assert!(plan.iter().any(|c| c.name == "get_weather_forecast"));

    let result = orchestrator.execute(plan, CancellationToken::new()).await;
    assert!(result.success);
    assert!(result.context_injection.contains("Kampala"));
    assert!(executor.calls.load(Ordering::Relaxed) >= 2);
}

#[tokio::test]
async fn comparison_query_plans_one_call_per_location() {
    let analyzer = QueryAnalyzer::new();
    let classification = analyzer.classify("Compare air quality in Nairobi vs Lagos");
    assert!(classification.comparison_intent);

    let executor = Arc::new(RecordingExecutor { calls: AtomicUsize::new(0) });
    let orchestrator = Orchestrator::new(executor, OrchestratorConfig::default());
    let plan = orchestrator.plan(&classification, "Compare air quality in Nairobi vs Lagos", &analyzer);
    assert_eq!(plan.iter().filter(|c| c.name == "get_african_city_air_quality").count(), 2);

    let result = orchestrator.execute(plan, CancellationToken::new()).await;
    assert_eq!(result.tools_used.iter().filter(|t| *t == "get_african_city_air_quality").count(), 2);
}

// ===========================================================================
// CostTracker + HealthMonitor — independent subsystems stay isolated
// ===========================================================================

#[test]
fn cost_tracker_and_health_monitor_do_not_share_state() {
    let tracker = CostTracker::new(CostLimits::default());
    let monitor = HealthMonitor::new(vec!["cache".to_string()]);

    tracker.track(500, 50);
    monitor.record_error("cache");

    let status = tracker.status();
    assert_eq!(status.tokens_today, 500);
    let report = monitor.check_health(true);
    assert_eq!(report.components.get("cache"), Some(&health::ComponentStatus::Degraded));
}
