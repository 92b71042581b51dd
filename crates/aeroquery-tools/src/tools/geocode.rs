//! Shared Open-Meteo geocoding lookup. Several tools accept a city name but
//! need coordinates for the underlying API; this resolves one to the
//! other. Not itself a registered `Tool`.

use crate::registry::ToolError;
use reqwest::Client;
use serde::Deserialize;

const GEOCODE_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

#[derive(Deserialize)]
struct GeocodeResponse {
    results: Option<Vec<GeocodeResult>>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    name: String,
    latitude: f64,
    longitude: f64,
}

pub struct Coordinates {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

pub async fn geocode_city(client: &Client, city: &str) -> Result<Coordinates, ToolError> {
    let response = client
        .get(GEOCODE_URL)
        .query(&[("name", city), ("count", "1")])
        .send()
        .await
        .map_err(|e| ToolError::Upstream(format!("geocoding request failed: {}", e)))?;

    let parsed: GeocodeResponse = response
        .json()
        .await
        .map_err(|e| ToolError::Upstream(format!("geocoding response was not valid json: {}", e)))?;

    let result = parsed
        .results
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| ToolError::Upstream(format!("could not geocode city: {}", city)))?;

    Ok(Coordinates { name: result.name, latitude: result.latitude, longitude: result.longitude })
}
