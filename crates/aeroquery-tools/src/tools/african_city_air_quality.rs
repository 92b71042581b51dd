//! `get_african_city_air_quality` (§4.4): realtime air quality for African
//! cities via the AirQo sensor network, which instruments African cities
//! far more densely than the global WAQI feed.

use crate::registry::{Tool, ToolError, ToolOutcome};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_BASE_URL: &str = "https://api.airqo.net/api/v2/devices/measurements";

pub struct AfricanCityAirQualityTool {
    client: Client,
    base_url: String,
}

impl AfricanCityAirQualityTool {
    pub fn new(client: Client) -> Self {
        Self { client, base_url: DEFAULT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct AirqoResponse {
    success: bool,
    measurements: Vec<AirqoMeasurement>,
}

#[derive(Deserialize)]
struct AirqoMeasurement {
    #[serde(rename = "siteDetails")]
    site_details: Option<AirqoSiteDetails>,
    pm2_5: Option<AirqoValue>,
    pm10: Option<AirqoValue>,
    #[serde(rename = "aqi_category")]
    aqi_category: Option<String>,
}

#[derive(Deserialize)]
struct AirqoSiteDetails {
    name: Option<String>,
}

#[derive(Deserialize)]
struct AirqoValue {
    value: f64,
}

#[async_trait::async_trait]
impl Tool for AfricanCityAirQualityTool {
    fn name(&self) -> &str {
        "get_african_city_air_quality"
    }

    fn description(&self) -> &str {
        "Get current air quality for an African city from the AirQo sensor network, which has denser coverage across Africa than global feeds."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "African city name, e.g. \"Kampala\"" }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let city = args
            .get("city")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: city".into()))?;

        let token = std::env::var("AIRQO_API_TOKEN")
            .map_err(|_| ToolError::Upstream("AIRQO_API_TOKEN is not configured".into()))?;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("token", token.as_str()), ("city", city)])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("airqo request failed: {}", e)))?;

        let parsed: AirqoResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("airqo response was not valid json: {}", e)))?;

        if !parsed.success || parsed.measurements.is_empty() {
            return Err(ToolError::Upstream(format!("no airqo coverage for {}", city)));
        }

        let m = &parsed.measurements[0];
        Ok(json!({
            "city": m.site_details.as_ref().and_then(|s| s.name.clone()).unwrap_or_else(|| city.to_string()),
            "pm25": m.pm2_5.as_ref().map(|v| v.value),
            "pm10": m.pm10.as_ref().map(|v| v.value),
            "category": m.aqi_category,
            "source": "airqo",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_public_airqo_endpoint() {
        let tool = AfricanCityAirQualityTool::new(Client::new());
        assert_eq!(tool.base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn missing_city_is_rejected_before_any_request() {
        let tool = AfricanCityAirQualityTool::new(Client::new());
        let result = tool.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }
}
