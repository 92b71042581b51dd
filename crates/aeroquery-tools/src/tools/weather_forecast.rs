//! `get_weather_forecast` (§4.4): multi-day weather forecast from
//! Open-Meteo, used to contextualize air quality (rain clears particulates,
//! heat drives ozone formation).

use crate::registry::{Tool, ToolError, ToolOutcome};
use crate::tools::geocode::geocode_city;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

pub struct WeatherForecastTool {
    client: Client,
}

impl WeatherForecastTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct WeatherResponse {
    daily: WeatherDaily,
}

#[derive(Deserialize)]
struct WeatherDaily {
    time: Vec<String>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    precipitation_sum: Vec<f64>,
    wind_speed_10m_max: Vec<f64>,
}

#[async_trait::async_trait]
impl Tool for WeatherForecastTool {
    fn name(&self) -> &str {
        "get_weather_forecast"
    }

    fn description(&self) -> &str {
        "Get a multi-day weather forecast (temperature, precipitation, wind) for a city."
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
                ("daily", "temperature_2m_max,temperature_2m_min,precipitation_sum,wind_speed_10m_max".to_string()),
                ("forecast_days", days.to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo request failed: {}", e)))?;

        let parsed: WeatherResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("open-meteo response was not valid json: {}", e)))?;

        let daily: Vec<Value> = parsed
            .daily
            .time
            .iter()
            .zip(&parsed.daily.temperature_2m_max)
            .zip(&parsed.daily.temperature_2m_min)
            .zip(&parsed.daily.precipitation_sum)
            .zip(&parsed.daily.wind_speed_10m_max)
            .map(|((((date, max), min), precip), wind)| {
                json!({
                    "date": date,
                    "temp_max_c": max,
                    "temp_min_c": min,
                    "precipitation_mm": precip,
                    "wind_speed_kmh": wind,
                })
            })
            .collect();

        Ok(json!({
            "city": coords.name,
            "days": days,
            "daily": daily,
            "source": "open-meteo",
        }))
    }
}
