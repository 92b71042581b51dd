//! `get_city_air_quality` (§4.4): global realtime air quality via the
//! World Air Quality Index feed API.

use crate::registry::{Tool, ToolError, ToolOutcome};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const BASE_URL: &str = "https://api.waqi.info/feed";

pub struct CityAirQualityTool {
    client: Client,
}

impl CityAirQualityTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct WaqiResponse {
    status: String,
    data: Option<WaqiData>,
}

#[derive(Deserialize)]
struct WaqiData {
    aqi: Value,
    city: WaqiCity,
    #[serde(default)]
    iaqi: HashMap<String, WaqiMetric>,
}

#[derive(Deserialize)]
struct WaqiCity {
    name: String,
}

#[derive(Deserialize)]
struct WaqiMetric {
    v: f64,
}

#[async_trait::async_trait]
impl Tool for CityAirQualityTool {
    fn name(&self) -> &str {
        "get_city_air_quality"
    }

    fn description(&self) -> &str {
        "Get current global air quality (AQI and pollutant levels) for a city by name."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "City name, e.g. \"Paris\"" }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let city = args
            .get("city")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: city".into()))?;

        let token = std::env::var("WAQI_API_TOKEN").unwrap_or_else(|_| "demo".to_string());
        let url = format!("{}/{}/", BASE_URL, city);

        let response = self
            .client
            .get(&url)
            .query(&[("token", token.as_str())])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("waqi request failed: {}", e)))?;

        let parsed: WaqiResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("waqi response was not valid json: {}", e)))?;

        let data = match parsed.status.as_str() {
            "ok" => parsed.data.ok_or_else(|| ToolError::Upstream("waqi returned ok with no data".into()))?,
            other => return Err(ToolError::Upstream(format!("waqi status: {}", other))),
        };

        Ok(json!({
            "city": data.city.name,
            "aqi": data.aqi,
            "pm25": data.iaqi.get("pm25").map(|m| m.v),
            "pm10": data.iaqi.get("pm10").map(|m| m.v),
            "o3": data.iaqi.get("o3").map(|m| m.v),
            "source": "waqi",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_schema_requires_city() {
        let tool = CityAirQualityTool::new(Client::new());
        let schema = tool.input_schema();
        assert_eq!(schema["required"][0], "city");
    }

    #[tokio::test]
    async fn missing_city_is_rejected_before_any_request() {
        let tool = CityAirQualityTool::new(Client::new());
        let result = tool.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }
}
