//! The Token Budgeter (§4.7): counts tokens with a heuristic in the absence
//! of a model-specific tokenizer, and truncates conversation history to fit
//! a model's context window by recency window + importance-scored knapsack.

use aeroquery_core::{Error, Role, Turn};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// 1 token ≈ 4 bytes, the fallback used whenever no model-specific
/// tokenizer is wired in (§4.7).
const CHARS_PER_TOKEN: f32 = 4.0;

/// Reserved budgets (§4.7): system preamble, model output, safety buffer.
const RESERVED_SYSTEM: usize = 1000;
const RESERVED_OUTPUT: usize = 2048;
const RESERVED_SAFETY: usize = 500;

/// Messages kept in the "recency window" regardless of importance score —
/// the last 3 user/assistant pairs.
const RECENCY_PAIRS: usize = 3;
const RECENCY_MESSAGES: usize = RECENCY_PAIRS * 2;

const DEFAULT_MODEL_LIMIT: usize = 8192;

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct OptimizeMeta {
    pub original_count: usize,
    pub final_count: usize,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub truncated: bool,
}

pub struct TokenBudgeter {
    model_limits: HashMap<String, usize>,
}

impl Default for TokenBudgeter {
    fn default() -> Self {
        let mut model_limits = HashMap::new();
        model_limits.insert("claude-3-5-haiku-20241022".to_string(), 200_000);
        model_limits.insert("claude-sonnet-4-20250514".to_string(), 200_000);
        model_limits.insert("mock-deterministic".to_string(), 8_192);
        model_limits.insert("llama3".to_string(), 8_192);
        Self::new(model_limits)
    }
}

impl TokenBudgeter {
    pub fn new(model_limits: HashMap<String, usize>) -> Self {
        Self { model_limits }
    }

    pub fn count_tokens(text: &str) -> usize {
        (text.len() as f32 / CHARS_PER_TOKEN).ceil() as usize
    }

    pub fn count_messages(turns: &[Turn]) -> usize {
        turns.iter().map(|t| Self::count_tokens(&t.content)).sum()
    }

    pub fn model_limit(&self, model: &str) -> usize {
        self.model_limits
            .iter()
            .find(|(name, _)| model == name.as_str() || model.starts_with(name.as_str()))
            .map(|(_, limit)| *limit)
            .unwrap_or(DEFAULT_MODEL_LIMIT)
    }

    pub fn history_budget(&self, model: &str) -> usize {
        self.model_limit(model).saturating_sub(RESERVED_SYSTEM + RESERVED_OUTPUT + RESERVED_SAFETY)
    }

    pub fn validate_input_size(&self, text: &str, max_bytes: usize) -> Result<(), Error> {
        if text.len() > max_bytes {
            return Err(Error::input_invalid(format!(
                "message is too long ({} bytes, max {})",
                text.len(),
                max_bytes
            )));
        }
        Ok(())
    }

    /// Truncates `turns` to fit `history_budget(model)`. Always keeps the
    /// recency window; fills any remaining budget with older messages
    /// chosen by descending importance score, then restores chronological
    /// order (§4.7).
    pub fn optimize(&self, turns: &[Turn], model: &str) -> (Vec<Turn>, OptimizeMeta) {
        let budget = self.history_budget(model);
        let original_tokens = Self::count_messages(turns);
        let original_count = turns.len();

        if turns.is_empty() {
            return (Vec::new(), OptimizeMeta { original_count, final_count: 0, original_tokens, final_tokens: 0, truncated: false });
        }

        let recency_count = RECENCY_MESSAGES.min(turns.len());
        let recency_start = turns.len() - recency_count;
        let recency = &turns[recency_start..];
        let recency_tokens: usize = recency.iter().map(|t| Self::count_tokens(&t.content)).sum();

        if recency_tokens > budget {
            let kept = keep_most_recent_that_fit(recency, budget);
            let final_tokens: usize = kept.iter().map(|t| Self::count_tokens(&t.content)).sum();
            let meta = OptimizeMeta {
                original_count,
                final_count: kept.len(),
                original_tokens,
                final_tokens,
                truncated: true,
            };
            return (kept, meta);
        }

        let older = &turns[..recency_start];
        let remaining_budget = budget - recency_tokens;
        let mut chosen = select_by_importance(older, remaining_budget);
        chosen.extend(recency.iter().cloned());

        let truncated = chosen.len() < original_count;
        let final_tokens: usize = chosen.iter().map(|t| Self::count_tokens(&t.content)).sum();
        let meta = OptimizeMeta { original_count, final_count: chosen.len(), original_tokens, final_tokens, truncated };
        (chosen, meta)
    }
}

/// Greedily keeps the most recent messages (scanning backward) that fit
/// `budget`. If even the single most recent message doesn't fit, emergency
/// truncates its content to `budget * 4` characters with a marker.
fn keep_most_recent_that_fit(recency: &[Turn], budget: usize) -> Vec<Turn> {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for turn in recency.iter().rev() {
        let tokens = TokenBudgeter::count_tokens(&turn.content);
        if used + tokens <= budget {
            kept.push(turn.clone());
            used += tokens;
        } else {
            break;
        }
    }
    kept.reverse();

    if kept.is_empty() {
        if let Some(last) = recency.last() {
            let cap_chars = (budget * 4).max(80);
            let mut truncated: String = last.content.chars().take(cap_chars).collect();
            truncated.push_str(" [truncated]");
            let mut emergency = last.clone();
            emergency.content = truncated;
            emergency.truncated = true;
            kept.push(emergency);
        }
    }
    kept
}

/// Knapsack by descending importance score; restores chronological order
/// among the chosen subset.
fn select_by_importance(older: &[Turn], budget: usize) -> Vec<Turn> {
    let mut scored: Vec<(usize, f32)> = older
        .iter()
        .enumerate()
        .map(|(i, t)| (i, importance_score(t, i == 0)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut chosen_indices = std::collections::HashSet::new();
    let mut used = 0usize;
    for (i, _) in &scored {
        let tokens = TokenBudgeter::count_tokens(&older[*i].content);
        if used + tokens <= budget {
            chosen_indices.insert(*i);
            used += tokens;
        }
    }

    older
        .iter()
        .enumerate()
        .filter(|(i, _)| chosen_indices.contains(i))
        .map(|(_, t)| t.clone())
        .collect()
}

/// Importance score (§4.7): positive signals for context-setting,
/// personalization, quantitative data, citations, and questions; negative
/// signals for short or small-talk messages.
fn importance_score(turn: &Turn, is_first: bool) -> f32 {
    let lower = turn.content.to_lowercase();
    let mut score = 0.0f32;

    if is_first {
        score += 2.0;
    }
    if turn.role == Role::User {
        score += 1.0;
    }
    if personalization_pattern().is_match(&lower) {
        score += 3.0;
    }
    if quantitative_pattern().is_match(&lower) {
        score += 2.0;
    }
    if citation_pattern().is_match(&lower) {
        score += 1.5;
    }
    if turn.content.contains('?') {
        score += 1.0;
    }
    if turn.content.len() < 50 {
        score -= 1.0;
    }
    if small_talk_pattern().is_match(&lower) {
        score -= 2.0;
    }

    score
}

fn personalization_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"my name is|i live in|i'?m from").unwrap())
}

fn quantitative_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\d+(\.\d+)?\s*(µg/m³|ug/m3|pm2\.5|pm10|aqi|ppm)").unwrap())
}

fn citation_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"according to|source:").unwrap())
}

fn small_talk_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"^\s*(hello|hi|hey|thanks|thank you|ok|okay|cool)[.!\s]*$").unwrap())
}
