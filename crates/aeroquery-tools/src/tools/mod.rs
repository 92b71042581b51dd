//! Individual tool implementations (§4.4). One file per tool; each exposes
//! a struct implementing the `Tool` trait and is registered in
//! `create_default_registry`.

pub mod african_city_air_quality;
pub mod air_quality_forecast;
pub mod city_air_quality;
pub(crate) mod geocode;
pub mod generate_chart;
pub mod openmeteo_current;
pub mod scrape_website;
pub mod search_web;
pub mod seasonal_context;
pub mod weather_forecast;
