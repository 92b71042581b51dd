//! aeroquery-tools — the Tool Registry & Executor (C4): the nine
//! air-quality, weather and web tools the orchestrator (C5) plans against,
//! registered behind a uniform `Tool` trait and a declared per-tool
//! timeout.

pub mod registry;
pub mod tools;

pub use registry::{Tool, ToolError, ToolOutcome, ToolRegistry, DEFAULT_TIMEOUT};

use reqwest::Client;

/// Builds the registry with every builtin tool wired to a shared HTTP
/// client. Network-backed tools read their API credentials from the
/// environment at call time, not construction time, so a registry built
/// without credentials configured is still valid — those tools simply fail
/// (and the orchestrator's fallback cascade takes over) until the
/// environment is set up.
pub fn create_default_registry() -> ToolRegistry {
    let client = Client::new();
    let mut registry = ToolRegistry::new();

    registry.register(tools::city_air_quality::CityAirQualityTool::new(client.clone()));
    registry.register(tools::african_city_air_quality::AfricanCityAirQualityTool::new(client.clone()));
    registry.register(tools::openmeteo_current::OpenMeteoCurrentTool::new(client.clone()));
    registry.register(tools::air_quality_forecast::AirQualityForecastTool::new(client.clone()));
    registry.register(tools::weather_forecast::WeatherForecastTool::new(client.clone()));
    registry.register(tools::search_web::SearchWebTool::new(client.clone()));
    registry.register(tools::scrape_website::ScrapeWebsiteTool::new(client.clone()));
    registry.register(tools::seasonal_context::SeasonalContextTool::new());
    registry.register(tools::generate_chart::GenerateChartTool::new());

    registry
}
