//! Integration tests for aeroquery-tools: registry wiring, schema shape,
//! and argument validation across all nine builtin tools. Network-backed
//! tools are exercised only down to "rejects bad input before making a
//! request" — live API calls aren't asserted on here, since test
//! determinism can't depend on third-party services being reachable.

use aeroquery_core::orchestrator::{ExecError, ToolExecutor};
use aeroquery_tools::*;
use serde_json::json;
use tokio_util::sync::CancellationToken;

const EXPECTED_TOOLS: &[&str] = &[
    "get_city_air_quality",
    "get_african_city_air_quality",
    "get_openmeteo_current_air_quality",
    "get_air_quality_forecast",
    "get_weather_forecast",
    "search_web",
    "scrape_website",
    "get_seasonal_context",
    "generate_chart",
];

#[test]
fn default_registry_has_all_nine_tools() {
    let registry = create_default_registry();
    let names = registry.list();
    assert_eq!(names.len(), EXPECTED_TOOLS.len());
    for expected in EXPECTED_TOOLS {
        assert!(names.contains(expected), "missing tool: {}", expected);
    }
}

#[test]
fn every_tool_definition_has_a_name_description_and_object_schema() {
    let registry = create_default_registry();
    let defs = registry.definitions();
    assert_eq!(defs.len(), EXPECTED_TOOLS.len());
    for def in &defs {
        assert!(!def.name.is_empty());
        assert!(!def.description.is_empty());
        assert!(def.input_schema.is_object());
    }
}

#[tokio::test]
async fn calling_an_unregistered_tool_name_returns_not_found() {
    let registry = create_default_registry();
    let result = registry.call("does_not_exist", json!({}), CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecError::NotFound)));
}

#[tokio::test]
async fn city_air_quality_rejects_missing_city_without_network() {
    let registry = create_default_registry();
    let result = registry.call("get_city_air_quality", json!({}), CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecError::Failed(_))));
}

#[tokio::test]
async fn african_city_air_quality_rejects_missing_city_without_network() {
    let registry = create_default_registry();
    let result = registry.call("get_african_city_air_quality", json!({}), CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecError::Failed(_))));
}

#[tokio::test]
async fn weather_forecast_rejects_missing_city_without_network() {
    let registry = create_default_registry();
    let result = registry.call("get_weather_forecast", json!({}), CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecError::Failed(_))));
}

#[tokio::test]
async fn scrape_website_rejects_non_http_scheme() {
    let registry = create_default_registry();
    let result = registry
        .call("scrape_website", json!({"url": "ftp://example.com/file"}), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ExecError::Failed(_))));
}

// ===========================================================================
// Deterministic, network-free tools run end to end through the registry.
// ===========================================================================

#[tokio::test]
async fn seasonal_context_runs_fully_offline_through_the_registry() {
    let registry = create_default_registry();
    let result = registry
        .call("get_seasonal_context", json!({"city": "Kampala", "month": 1}), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result["season"], "harmattan/dry");
}

#[tokio::test]
async fn generate_chart_runs_fully_offline_through_the_registry() {
    let registry = create_default_registry();
    let result = registry
        .call(
            "generate_chart",
            json!({"labels": ["Mon", "Tue", "Wed"], "values": [30.0, 45.0, 60.0]}),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result["url"].as_str().unwrap().starts_with("https://quickchart.io/chart"));
}

#[tokio::test]
async fn generate_chart_rejects_mismatched_series_lengths_through_the_registry() {
    let registry = create_default_registry();
    let result = registry
        .call("generate_chart", json!({"labels": ["Mon"], "values": [1.0, 2.0]}), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ExecError::Failed(_))));
}
