//! `generate_chart` (§4.4): optional visualization. Builds a Chart.js
//! config from a label/value series and renders it via QuickChart's
//! keyless image service rather than drawing pixels locally — the tool's
//! output is a URL the gateway can embed or the LLM can cite.

use crate::registry::{Tool, ToolError, ToolOutcome};
use serde_json::{json, Value};

const QUICKCHART_BASE_URL: &str = "https://quickchart.io/chart";

pub struct GenerateChartTool;

impl Default for GenerateChartTool {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerateChartTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Tool for GenerateChartTool {
    fn name(&self) -> &str {
        "generate_chart"
    }

    fn description(&self) -> &str {
        "Generate a chart (line or bar) from labeled data points, returning an image URL."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "chart_type": { "type": "string", "enum": ["line", "bar"] },
                "labels": { "type": "array", "items": { "type": "string" } },
                "values": { "type": "array", "items": { "type": "number" } },
                "series_label": { "type": "string" }
            },
            "required": ["labels", "values"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let labels: Vec<String> = args
            .get("labels")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: labels".into()))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let values: Vec<f64> = args
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: values".into()))?
            .iter()
            .filter_map(|v| v.as_f64())
            .collect();

        if labels.len() != values.len() || labels.is_empty() {
            return Err(ToolError::InvalidArgs("labels and values must be non-empty and the same length".into()));
        }

        let chart_type = args.get("chart_type").and_then(|v| v.as_str()).unwrap_or("line");
        let title = args.get("title").and_then(|v| v.as_str()).unwrap_or("Air Quality");
        let series_label = args.get("series_label").and_then(|v| v.as_str()).unwrap_or("AQI");

        let config = json!({
            "type": chart_type,
            "data": {
                "labels": labels,
                "datasets": [{ "label": series_label, "data": values }]
            },
            "options": {
                "title": { "display": true, "text": title }
            }
        });

        let encoded_config = serde_urlencoded_config(&config);
        let url = format!("{}?c={}", QUICKCHART_BASE_URL, encoded_config);

        Ok(json!({
            "url": url,
            "chart_type": chart_type,
            "title": title,
            "source": "quickchart",
        }))
    }
}

/// Percent-encodes a chart config for QuickChart's `c` query parameter.
/// Not a general-purpose URL encoder — just the characters JSON can
/// contain that aren't safe bare in a query string.
fn serde_urlencoded_config(config: &Value) -> String {
    let json = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
    let mut out = String::with_capacity(json.len());
    for byte in json.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mismatched_label_and_value_lengths_are_rejected() {
        let tool = GenerateChartTool::new();
        let result = tool.execute(json!({"labels": ["Mon", "Tue"], "values": [10.0]})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn builds_a_quickchart_url_with_encoded_config() {
        let tool = GenerateChartTool::new();
        let response = tool
            .execute(json!({"labels": ["Mon", "Tue"], "values": [40.0, 55.0], "title": "Lagos AQI"}))
            .await
            .unwrap();
        let url = response["url"].as_str().unwrap();
        assert!(url.starts_with("https://quickchart.io/chart?c="));
        assert!(!url.contains(' '));
    }
}
