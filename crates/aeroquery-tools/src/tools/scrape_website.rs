//! `scrape_website` (§4.4): fetches a URL and extracts its visible text, a
//! last-resort fallback behind `search_web` in the cascade.

use crate::registry::{Tool, ToolError, ToolOutcome};
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::OnceLock;

const MAX_CONTENT_CHARS: usize = 4000;

pub struct ScrapeWebsiteTool {
    client: Client,
}

impl ScrapeWebsiteTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Tool for ScrapeWebsiteTool {
    fn name(&self) -> &str {
        "scrape_website"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its readable text content, truncated to a few thousand characters."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> ToolOutcome {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing required parameter: url".into()))?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArgs(format!("not an http(s) url: {}", url)));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ToolError::Upstream(format!("fetch returned status {}", response.status())));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ToolError::Upstream(format!("failed to read response body: {}", e)))?;

        let text = strip_html(&html);
        let truncated: String = text.chars().take(MAX_CONTENT_CHARS).collect();

        Ok(json!({
            "url": url,
            "content": truncated,
            "truncated": text.chars().count() > MAX_CONTENT_CHARS,
            "source": "scrape",
        }))
    }
}

fn noise_tag_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</\1>").unwrap())
}

fn tag_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap())
}

fn whitespace_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// A deliberately simple tag-stripper: no DOM tree, no script execution,
/// just enough to turn an HTML page into readable text for the LLM.
fn strip_html(html: &str) -> String {
    let without_scripts = noise_tag_pattern().replace_all(html, " ");
    let without_tags = tag_pattern().replace_all(&without_scripts, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    whitespace_pattern().replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_is_rejected() {
        let tool = ScrapeWebsiteTool::new(Client::new());
        let result = tool.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn non_http_url_is_rejected() {
        let tool = ScrapeWebsiteTool::new(Client::new());
        let result = tool.execute(json!({"url": "file:///etc/passwd"})).await;
        assert!(matches!(result, Err(ToolError::InvalidArgs(_))));
    }

    #[test]
    fn strip_html_removes_scripts_and_tags() {
        let html = "<html><head><script>evil()</script></head><body><p>Hello &amp; welcome</p></body></html>";
        let text = strip_html(html);
        assert!(!text.contains("evil"));
        assert!(text.contains("Hello & welcome"));
    }
}
