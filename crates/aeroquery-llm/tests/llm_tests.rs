//! Tests for aeroquery-llm: wire types, the text tool-call fallback
//! extractor, backoff semantics, and the `Provider` trait across its
//! offline implementations.

use aeroquery_core::Message;
use aeroquery_llm::*;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// ProviderRequest / ProviderResponse
// ===========================================================================

#[test]
fn provider_request_new_has_sane_defaults() {
    let req = ProviderRequest::new("mock-deterministic", "hello");
    assert_eq!(req.model, "mock-deterministic");
    assert_eq!(req.message, "hello");
    assert!(req.history.is_empty());
    assert!(req.system.is_none());
    assert!(req.tools.is_empty());
    assert_eq!(req.max_tokens, Some(8192));
}

#[test]
fn finish_reason_serde_round_trip() {
    let json = serde_json::to_string(&FinishReason::Length).unwrap();
    assert_eq!(json, r#""length""#);
    let back: FinishReason = serde_json::from_str(&json).unwrap();
    assert_eq!(back, FinishReason::Length);
}

#[test]
fn usage_default_is_zeroed() {
    let u = Usage::default();
    assert_eq!(u.input_tokens, 0);
    assert_eq!(u.output_tokens, 0);
}

// ===========================================================================
// extract_tool_calls_from_text
// ===========================================================================

#[test]
fn extracts_multiple_known_calls_and_strips_them_from_text() {
    let known = vec!["get_weather_forecast".to_string(), "get_city_air_quality".to_string()];
    let text = "Checking now. get_city_air_quality(city=\"Kampala\") and get_weather_forecast(city=\"Kampala\", days=3)";
    let (cleaned, calls) = extract_tool_calls_from_text(text, &known);
    assert_eq!(calls.len(), 2);
    assert!(!cleaned.contains('('));
}

#[test]
fn leaves_text_alone_when_nothing_matches() {
    let known = vec!["get_city_air_quality".to_string()];
    let (cleaned, calls) = extract_tool_calls_from_text("just a plain sentence.", &known);
    assert!(calls.is_empty());
    assert_eq!(cleaned, "just a plain sentence.");
}

// ===========================================================================
// LlmError -> aeroquery_core::Error conversion
// ===========================================================================

#[test]
fn rate_limited_converts_to_core_rate_limited_with_retry_after() {
    let err: aeroquery_core::Error = LlmError::RateLimited { retry_after_ms: 2_000 }.into();
    match err {
        aeroquery_core::Error::ProviderRateLimited { retry_after_ms } => assert_eq!(retry_after_ms, 2_000),
        other => panic!("expected ProviderRateLimited, got {other:?}"),
    }
}

#[test]
fn cancelled_converts_to_internal_error() {
    let err: aeroquery_core::Error = LlmError::Cancelled.into();
    assert!(matches!(err, aeroquery_core::Error::Internal { .. }));
}

#[test]
fn auth_failed_converts_to_provider_unavailable() {
    let err: aeroquery_core::Error = LlmError::AuthFailed("bad key".into()).into();
    assert!(matches!(err, aeroquery_core::Error::ProviderUnavailable { .. }));
}

// ===========================================================================
// Provider trait — MockProvider and LocalProvider (no network)
// ===========================================================================

#[tokio::test]
async fn mock_provider_is_deterministic_and_reports_no_tool_support() {
    let provider = MockProvider::new();
    assert_eq!(provider.name(), "mock");
    assert!(!provider.supports_tool_calling());
    assert!(provider.supports_model("mock-deterministic"));

    let request = ProviderRequest::new("mock-deterministic", "What's the air quality in Accra?");
    let response = provider.process_message(request, CancellationToken::new()).await.unwrap();
    assert!(!response.text.is_empty());
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert!(response.extracted_tool_calls.is_empty());
}

#[test]
fn local_provider_models_reflects_constructor_list() {
    let provider = LocalProvider::new(vec!["llama3".to_string(), "mistral".to_string()]);
    assert_eq!(provider.models(), vec!["llama3".to_string(), "mistral".to_string()]);
    assert!(provider.supports_model("llama3"));
    assert!(!provider.supports_model("gpt-4"));
    assert!(!provider.supports_tool_calling());
}

#[tokio::test]
async fn cloud_providers_differ_only_in_tool_support() {
    let with_tools = CloudWithToolsProvider::new("sk-fake");
    let without_tools = CloudWithoutToolsProvider::new("sk-fake");
    assert_eq!(with_tools.name(), "anthropic-tools");
    assert_eq!(without_tools.name(), "anthropic-text");
    assert!(with_tools.supports_tool_calling());
    assert!(!without_tools.supports_tool_calling());
    assert!(!with_tools.models().is_empty());
    assert_eq!(with_tools.models(), without_tools.models());
}

#[tokio::test]
async fn cancellation_token_already_cancelled_surfaces_as_cancelled_error() {
    let provider = CloudWithToolsProvider::new("sk-bad-key-definitely-invalid");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let request = ProviderRequest::new("claude-3-5-haiku-20241022", "hello");
    let result = provider.process_message(request, cancel).await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
}

// ===========================================================================
// Message history plumbing through ProviderRequest
// ===========================================================================

#[test]
fn provider_request_carries_prior_turns_in_history() {
    let mut request = ProviderRequest::new("mock-deterministic", "and now?");
    request.history.push(Message::user("What's the air quality in Kampala?"));
    request.history.push(Message::assistant("It's moderate today."));
    assert_eq!(request.history.len(), 2);
    assert_eq!(request.history[0].role, aeroquery_core::Role::User);
}
