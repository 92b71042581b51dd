//! `search_web` (§4.4): general-purpose fallback when no structured air
//! quality source covers the query, via DuckDuckGo's keyless Instant
//! Answer API.

use crate::registry::{Tool, ToolError, ToolOutcome};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const BASE_URL: &str = "https://api.duckduckgo.com/";

pub struct SearchWebTool {
    client: Client,
}

impl SearchWebTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct DuckDuckGoResponse {
    #[serde(rename = "AbstractText")]
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    #[serde(rename = "Heading")]
    heading: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text")]
    text: Option<String>,
    #[serde(rename = "FirstURL")]
    first_url: Option<String>,
}

#[async_trait::async_trait]
impl Tool for SearchWebTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn description(&self) -> &str {
        "Search the web for general information not covered by the structured air quality tools."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: query".into()))?;

        let response = self
            .client
            .get(BASE_URL)
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("search request failed: {}", e)))?;

        let parsed: DuckDuckGoResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Upstream(format!("search response was not valid json: {}", e)))?;

        let mut results = Vec::new();
        if !parsed.abstract_text.is_empty() {
            results.push(json!({
                "title": parsed.heading,
                "snippet": parsed.abstract_text,
                "url": parsed.abstract_url,
            }));
        }
        for topic in parsed.related_topics.into_iter().take(4) {
            if let (Some(text), Some(url)) = (topic.text, topic.first_url) {
                results.push(json!({ "title": text.clone(), "snippet": text, "url": url }));
            }
        }

        if results.is_empty() {
            return Err(ToolError::Upstream(format!("no search results for: {}", query)));
        }

        Ok(json!({ "query": query, "results": results, "source": "duckduckgo" }))
    }
}
