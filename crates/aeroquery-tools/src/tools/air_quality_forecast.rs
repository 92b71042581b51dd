//! `get_air_quality_forecast` (§4.4): multi-day air quality forecast from
//! Open-Meteo, geocoding the city name first.

use crate::registry::{Tool, ToolError, ToolOutcome};
use crate::tools::geocode::geocode_city;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

pub struct AirQualityForecastTool {
    client: Client,
}

impl AirQualityForecastTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct OpenMeteoForecastResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    us_aqi: Vec<Option<f64>>,
    pm2_5: Vec<Option<f64>>,
}

#[async_trait::async_trait]
impl Tool for AirQualityForecastTool {
    fn name(&self) -> &str {
        "get_air_quality_forecast"
    }

    fn description(&self) -> &str {
        "Get a multi-day air quality forecast (AQI, PM2.5) for a city."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "days": { "type": "integer", "description": "Forecast horizon in days, default 3, max 7" }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let city = args
            .get("city")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: city".into()))?;
        let days = args.get("days").and_then(|v| v.as_u64()).unwrap_or(3).clamp(1, 7);

        let coords = geocode_city(&self.client, city).await?;

        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("latitude", coords.latitude.to_string()),
                ("longitude", coords.longitude.to_string()),
                ("hourly", "us_aqi,pm2_5".to_string()),
                ("forecast_days", days.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo request failed: {}", e)))?;

        let parsed: OpenMeteoForecastResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo response was not valid json: {}", e)))?;

        let daily = daily_summary(&parsed.hourly);

        Ok(json!({
            "city": coords.name,
            "days": days,
            "daily": daily,
            "source": "open-meteo",
        }))
    }
}

/// Collapses the hourly series into one (date, peak_aqi, avg_pm25) entry per
/// calendar day — the granularity the context-injection formatter needs.
fn daily_summary(hourly: &OpenMeteoHourly) -> Vec<Value> {
    use std::collections::BTreeMap;

    let mut by_day: BTreeMap<&str, (f64, u32, f64, u32)> = BTreeMap::new();
    for ((time, aqi), pm25) in hourly.time.iter().zip(&hourly.us_aqi).zip(&hourly.pm2_5) {
        let Some(date) = time.get(..10) else { continue };
        let entry = by_day.entry(date).or_insert((0.0, 0, 0.0, 0));
        if let Some(a) = aqi {
            entry.0 = entry.0.max(*a);
        }
        if let Some(p) = pm25 {
            entry.2 += p;
            entry.3 += 1;
        }
        entry.1 += 1;
    }

    by_day
        .into_iter()
        .map(|(date, (peak_aqi, _count, pm25_sum, pm25_count))| {
            let avg_pm25 = if pm25_count > 0 { pm25_sum / pm25_count as f64 } else { 0.0 };
            json!({ "date": date, "peak_aqi": peak_aqi, "avg_pm25": avg_pm25 })
        })
        .collect()
}
