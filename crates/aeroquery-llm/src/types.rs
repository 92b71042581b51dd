//! Wire types for the Provider Abstraction's request/response contract (§4.8).
//!
//! Unlike the teacher's streaming-first `LlmRequest`/`StreamDelta` pair, a
//! turn here is a single request/response exchange — providers that speak
//! SSE (Anthropic) accumulate the stream internally and hand back one
//! `ProviderResponse`. This matches the spec's "process a message, get a
//! response" contract and keeps C9 free of stream-lifecycle bookkeeping.

use aeroquery_core::{Message, ToolCall, ToolDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// One provider call's input. `history` excludes the current `message`.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub model: String,
    pub message: String,
    pub history: Vec<Message>,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: message.into(),
            history: Vec::new(),
            system: None,
            tools: Vec::new(),
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: Some(8192),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// Token usage reported back from the provider, if it reports one.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One provider call's output (§4.8's "Output contract").
#[derive(Clone, Debug, Default)]
pub struct ProviderResponse {
    pub text: String,
    /// Tool names the provider invoked itself (Cloud-with-tools only).
    pub tools_used: Vec<String>,
    /// Tool calls recovered from free-form text (the text-fallback path);
    /// the caller is responsible for executing these and re-submitting.
    pub extracted_tool_calls: Vec<ToolCall>,
    pub tokens_used: Option<Usage>,
    pub cost_estimate: Option<f64>,
    pub finish_reason: FinishReason,
    pub thinking: Option<String>,
}

impl Default for FinishReason {
    fn default() -> Self {
        FinishReason::Stop
    }
}

/// Extracts `name(arg=value, arg2="value two")`-shaped calls from `text` for
/// any `name` present in `known_tools`. Returns the text with matched calls
/// stripped (so it isn't echoed to the user) and the extracted calls.
///
/// This is the "model can't be trusted to emit structured tool calls"
/// fallback (§4.8) used by the no-tools cloud provider and the local
/// provider.
pub fn extract_tool_calls_from_text(text: &str, known_tools: &[String]) -> (String, Vec<ToolCall>) {
    let pattern = call_pattern();
    let mut calls = Vec::new();
    let mut cleaned = text.to_string();

    for caps in pattern.captures_iter(text) {
        let name = &caps[1];
        if !known_tools.iter().any(|t| t == name) {
            continue;
        }
        let args_str = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let arguments = parse_call_arguments(args_str);
        let full_match = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        cleaned = cleaned.replacen(full_match, "", 1);
        calls.push(ToolCall {
            id: format!("extracted-{}", calls.len()),
            name: name.to_string(),
            arguments: serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string()),
        });
    }

    (cleaned.trim().to_string(), calls)
}

fn call_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"([a-z][a-z0-9_]*)\(([^()]*)\)").unwrap())
}

fn parse_call_arguments(raw: &str) -> HashMap<String, serde_json::Value> {
    let mut out = HashMap::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once('=') else { continue };
        let key = key.trim().to_string();
        let value = value.trim().trim_matches('"').trim_matches('\'');
        let parsed = if let Ok(n) = value.parse::<f64>() {
            serde_json::json!(n)
        } else {
            serde_json::json!(value)
        };
        out.insert(key, parsed);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_call_with_string_and_numeric_args() {
        let known = vec!["get_city_air_quality".to_string()];
        let (cleaned, calls) =
            extract_tool_calls_from_text("Sure, let me check. get_city_air_quality(city=\"Kampala\", days=3)", &known);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_city_air_quality");
        assert!(!cleaned.contains("get_city_air_quality("));
        let args: HashMap<String, serde_json::Value> = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args["city"], "Kampala");
        assert_eq!(args["days"], 3.0);
    }

    #[test]
    fn ignores_calls_to_unknown_functions() {
        let known = vec!["get_city_air_quality".to_string()];
        let (_, calls) = extract_tool_calls_from_text("print(x=1)", &known);
        assert!(calls.is_empty());
    }
}
