//! `get_openmeteo_current_air_quality` (§4.4): modeled realtime air quality
//! from Open-Meteo's keyless air-quality API. Accepts either coordinates
//! directly or a city name to geocode, since the orchestrator's fallback
//! cascade hands this tool the same `city` argument a failed
//! `get_city_air_quality`/`get_african_city_air_quality` call received.

use crate::registry::{Tool, ToolError, ToolOutcome};
use crate::tools::geocode::geocode_city;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

pub struct OpenMeteoCurrentTool {
    client: Client,
}

impl OpenMeteoCurrentTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct OpenMeteoResponse {
    current: OpenMeteoCurrent,
}

#[derive(Deserialize)]
struct OpenMeteoCurrent {
    pm10: Option<f64>,
    pm2_5: Option<f64>,
    ozone: Option<f64>,
    nitrogen_dioxide: Option<f64>,
    sulphur_dioxide: Option<f64>,
    us_aqi: Option<f64>,
}

#[async_trait::async_trait]
impl Tool for OpenMeteoCurrentTool {
    fn name(&self) -> &str {
        "get_openmeteo_current_air_quality"
    }

    fn description(&self) -> &str {
        "Get modeled current air quality from Open-Meteo for a location given as coordinates or a city name."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": { "type": "number" },
                "longitude": { "type": "number" },
                "city": { "type": "string", "description": "Used to geocode when latitude/longitude are not supplied" }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let lat_lon = (args.get("latitude").and_then(|v| v.as_f64()), args.get("longitude").and_then(|v| v.as_f64()));

        let (latitude, longitude) = match lat_lon {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                let city = args
                    .get("city")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::InvalidArgs("provide either latitude/longitude or city".into()))?;
                let coords = geocode_city(&self.client, city).await?;
                (coords.latitude, coords.longitude)
            }
        };

        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "pm10,pm2_5,ozone,nitrogen_dioxide,sulphur_dioxide,us_aqi".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo request failed: {}", e)))?;

        let parsed: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo response was not valid json: {}", e)))?;

        Ok(json!({
            "latitude": latitude,
            "longitude": longitude,
            "aqi": parsed.current.us_aqi,
            "pm25": parsed.current.pm2_5,
            "pm10": parsed.current.pm10,
            "o3": parsed.current.ozone,
            "no2": parsed.current.nitrogen_dioxide,
            "so2": parsed.current.sulphur_dioxide,
            "source": "open-meteo",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_when_neither_coordinates_nor_city_given() {
        let tool = OpenMeteoCurrentTool::new(Client::new());
        let result = tool.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }
}
