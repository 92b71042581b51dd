//! Deterministic query classification (§4.3). No model call, no I/O —
//! `classify` is a pure function of its input string and the static
//! dictionaries below.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AirQualityData,
    Forecast,
    HealthAdvice,
    Comparison,
    TrendAnalysis,
    GeneralKnowledge,
    PersonalInfo,
    GeneralInquiry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Current,
    Forecast,
    Historical,
    Comparison,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Aqi,
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectedLocation {
    pub name: String,
    pub is_african: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonalInfoSignal {
    pub sharing: bool,
    pub name: Option<String>,
    pub location: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub complexity: Complexity,
    pub locations: Vec<DetectedLocation>,
    pub metrics: HashSet<Metric>,
    pub time_range: TimeRange,
    pub comparison_intent: bool,
    pub needs_external_data: bool,
    pub confidence: f32,
    pub personal_info: Option<PersonalInfoSignal>,
}

pub struct QueryAnalyzer;

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self
    }
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Pure, deterministic, no I/O.
    pub fn classify(&self, message: &str) -> ClassificationResult {
        let lower = message.to_lowercase();

        if let Some(signal) = detect_personal_info(&lower) {
            return ClassificationResult {
                intent: Intent::PersonalInfo,
                complexity: Complexity::Simple,
                locations: Vec::new(),
                metrics: HashSet::from([Metric::Aqi]),
                time_range: TimeRange::Current,
                comparison_intent: false,
                needs_external_data: false,
                confidence: 1.0,
                personal_info: Some(signal),
            };
        }

        let locations = detect_locations(&lower);
        let time_range = detect_time_range(&lower);
        let metrics = detect_metrics(&lower);
        let comparison_intent = detect_comparison(&lower, locations.len());
        let (intent, top_score) = detect_intent(&lower, &locations, time_range, comparison_intent);

        let word_count = message.split_whitespace().count();
        let complexity = if locations.len() > 2 || (comparison_intent && time_range == TimeRange::Historical) {
            Complexity::Complex
        } else if word_count < 10 && top_score <= 1 {
            Complexity::Simple
        } else {
            Complexity::Moderate
        };

        let needs_external_data = matches!(
            intent,
            Intent::AirQualityData | Intent::Forecast | Intent::Comparison | Intent::TrendAnalysis
        );

        let confidence = (top_score as f32 / 3.0).min(1.0).max(0.5);

        ClassificationResult {
            intent,
            complexity,
            locations,
            metrics,
            time_range,
            comparison_intent,
            needs_external_data,
            confidence,
            personal_info: None,
        }
    }

    /// Tool-relevance score in [0,1] for a planned tool given the
    /// classification and the tool's capability descriptor.
    pub fn tool_relevance(&self, capability: &ToolCapability, classification: &ClassificationResult) -> f32 {
        let mut score = capability.base_confidence;

        let query_is_african = classification.locations.iter().any(|l| l.is_african);
        if capability.africa_specialist && query_is_african {
            score += 0.20;
        }
        if classification.time_range == TimeRange::Current && capability.realtime {
            score += 0.10;
        }
        if classification.time_range == TimeRange::Historical && !capability.historical {
            score -= 0.30;
        }

        score.clamp(0.0, 1.0)
    }
}

/// Declared capability descriptor for a registered tool, used only for
/// relevance scoring — the tool's actual contract lives in the tool
/// registry (C4), not here.
#[derive(Clone, Debug)]
pub struct ToolCapability {
    pub africa_specialist: bool,
    pub realtime: bool,
    pub historical: bool,
    pub base_confidence: f32,
}

fn detect_personal_info(lower: &str) -> Option<PersonalInfoSignal> {
    static SHARE_NAME: OnceLock<Regex> = OnceLock::new();
    static SHARE_LOC_LIVE: OnceLock<Regex> = OnceLock::new();
    static SHARE_LOC_FROM: OnceLock<Regex> = OnceLock::new();
    static RECALL_NAME: OnceLock<Regex> = OnceLock::new();
    static RECALL_LOC: OnceLock<Regex> = OnceLock::new();

    let share_name = SHARE_NAME.get_or_init(|| Regex::new(r"my name is ([a-zA-Z][a-zA-Z\s'\-]{0,40})").unwrap());
    let share_live = SHARE_LOC_LIVE.get_or_init(|| Regex::new(r"i live in ([a-zA-Z][a-zA-Z\s,'\-]{0,40})").unwrap());
    let share_from = SHARE_LOC_FROM.get_or_init(|| Regex::new(r"i'?m from ([a-zA-Z][a-zA-Z\s,'\-]{0,40})").unwrap());
    let recall_name = RECALL_NAME.get_or_init(|| Regex::new(r"what'?s my name|what is my name").unwrap());
    let recall_loc = RECALL_LOC.get_or_init(|| Regex::new(r"where do i live|where am i from").unwrap());

    let name = share_name
        .captures(lower)
        .and_then(|c| c.get(1))
        .map(|m| title_case(m.as_str().trim()));
    let location = share_live
        .captures(lower)
        .or_else(|| share_from.captures(lower))
        .and_then(|c| c.get(1))
        .map(|m| title_case(m.as_str().trim().trim_end_matches('.')));

    if name.is_some() || location.is_some() {
        return Some(PersonalInfoSignal { sharing: true, name, location });
    }

    if recall_name.is_match(lower) || recall_loc.is_match(lower) {
        return Some(PersonalInfoSignal { sharing: false, name: None, location: None });
    }

    None
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn african_cities() -> &'static [&'static str] {
    &[
        "kampala", "nairobi", "lagos", "accra", "kigali", "dar es salaam", "addis ababa",
        "cairo", "johannesburg", "cape town", "abuja", "dakar", "kinshasa", "mwanza",
        "mombasa", "harare", "lusaka", "bamako", "yaounde", "tunis", "algiers", "khartoum",
    ]
}

fn global_cities() -> &'static [&'static str] {
    &[
        "paris", "london", "new york", "tokyo", "beijing", "delhi", "mumbai", "los angeles",
        "berlin", "madrid", "rome", "moscow", "seoul", "bangkok", "jakarta", "sydney",
        "toronto", "chicago", "singapore", "mexico city",
    ]
}

fn coordinate_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(-?\d+\.?\d*)\s*,\s*(-?\d+\.?\d*)").unwrap())
}

fn detect_locations(lower: &str) -> Vec<DetectedLocation> {
    let mut found = Vec::new();
    for city in african_cities() {
        if lower.contains(city) {
            found.push(DetectedLocation { name: title_case(city), is_african: true });
        }
    }
    for city in global_cities() {
        if lower.contains(city) {
            found.push(DetectedLocation { name: title_case(city), is_african: false });
        }
    }
    for caps in coordinate_pattern().captures_iter(lower) {
        let (Ok(lat), Ok(lon)) = (caps[1].parse::<f64>(), caps[2].parse::<f64>()) else { continue };
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            found.push(DetectedLocation { name: format!("{},{}", lat, lon), is_african: false });
        }
    }
    found
}

fn detect_time_range(lower: &str) -> TimeRange {
    let forecast_kw = ["forecast", "tomorrow", "next week", "next few days", "upcoming"];
    let historical_kw = ["yesterday", "last week", "trend", "history", "historical"];
    let comparison_kw = ["weekend", "daily", "hourly"];

    if forecast_kw.iter().any(|k| lower.contains(k)) {
        TimeRange::Forecast
    } else if historical_kw.iter().any(|k| lower.contains(k)) {
        TimeRange::Historical
    } else if comparison_kw.iter().any(|k| lower.contains(k)) {
        TimeRange::Comparison
    } else {
        TimeRange::Current
    }
}

fn detect_metrics(lower: &str) -> HashSet<Metric> {
    let mut metrics = HashSet::new();
    let table: &[(&str, Metric)] = &[
        ("aqi", Metric::Aqi),
        ("pm2.5", Metric::Pm25),
        ("pm25", Metric::Pm25),
        ("pm10", Metric::Pm10),
        ("ozone", Metric::O3),
        ("o3", Metric::O3),
        ("no2", Metric::No2),
        ("nitrogen dioxide", Metric::No2),
        ("so2", Metric::So2),
        ("sulfur dioxide", Metric::So2),
        ("carbon monoxide", Metric::Co),
        ("co ", Metric::Co),
    ];
    for (kw, metric) in table {
        if lower.contains(kw) {
            metrics.insert(*metric);
        }
    }
    if metrics.is_empty() {
        metrics.insert(Metric::Aqi);
    }
    metrics
}

fn detect_comparison(lower: &str, location_count: usize) -> bool {
    let connectors = [" vs ", " versus ", " compared to "];
    connectors.iter().any(|c| lower.contains(c)) || location_count > 1
}

/// Returns (intent, the winning class's keyword-match score) so the caller
/// can derive both complexity and confidence from it.
fn detect_intent(
    lower: &str,
    locations: &[DetectedLocation],
    time_range: TimeRange,
    comparison_intent: bool,
) -> (Intent, u32) {
    let health_kw = ["health", "safe", "asthma", "breathe", "mask", "risk", "sensitive"];
    let general_knowledge_kw = ["what is aqi", "what is pm2.5", "how is air quality measured", "explain"];
    let trend_kw = ["trend", "over time", "history", "historical"];

    let mut scores: Vec<(Intent, u32)> = Vec::new();

    if comparison_intent {
        scores.push((Intent::Comparison, 3));
    }
    if time_range == TimeRange::Forecast {
        scores.push((Intent::Forecast, 3));
    }
    if time_range == TimeRange::Historical || trend_kw.iter().any(|k| lower.contains(k)) {
        scores.push((Intent::TrendAnalysis, 2));
    }
    if !locations.is_empty() {
        scores.push((Intent::AirQualityData, 2));
    }
    let health_hits = health_kw.iter().filter(|k| lower.contains(*k)).count() as u32;
    if health_hits > 0 {
        scores.push((Intent::HealthAdvice, health_hits));
    }
    if general_knowledge_kw.iter().any(|k| lower.contains(k)) {
        scores.push((Intent::GeneralKnowledge, 1));
    }

    if scores.is_empty() {
        return (Intent::GeneralInquiry, 1);
    }

    // Ties broken by priority order (§4.3 step 6).
    let priority = [
        Intent::PersonalInfo,
        Intent::AirQualityData,
        Intent::Forecast,
        Intent::Comparison,
        Intent::TrendAnalysis,
        Intent::HealthAdvice,
        Intent::GeneralKnowledge,
        Intent::GeneralInquiry,
    ];

    let max_score = scores.iter().map(|(_, s)| *s).max().unwrap_or(1);
    let winner = priority
        .iter()
        .find(|p| scores.iter().any(|(i, s)| i == *p && *s == max_score))
        .copied()
        .unwrap_or(Intent::GeneralInquiry);

    (winner, max_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn african_city_current_aqi() {
        let result = QueryAnalyzer::new().classify("What's the air quality in Kampala?");
        assert_eq!(result.intent, Intent::AirQualityData);
        assert_eq!(result.time_range, TimeRange::Current);
        assert!(result.locations.iter().any(|l| l.name == "Kampala" && l.is_african));
        assert!(result.needs_external_data);
    }

    #[test]
    fn comparison_with_forecast() {
        let result = QueryAnalyzer::new().classify("Compare air quality in Nairobi vs Lagos tomorrow");
        assert_eq!(result.intent, Intent::Comparison);
        assert_eq!(result.time_range, TimeRange::Forecast);
        assert!(result.comparison_intent);
        assert_eq!(result.locations.len(), 2);
    }

    #[test]
    fn personal_info_sharing_extracts_fields() {
        let result = QueryAnalyzer::new().classify("My name is Ada and I live in Accra.");
        assert_eq!(result.intent, Intent::PersonalInfo);
        let info = result.personal_info.unwrap();
        assert!(info.sharing);
        assert_eq!(info.name.as_deref(), Some("Ada"));
        assert_eq!(info.location.as_deref(), Some("Accra"));
    }

    #[test]
    fn personal_info_recall_question() {
        let result = QueryAnalyzer::new().classify("What's my name?");
        assert_eq!(result.intent, Intent::PersonalInfo);
        assert!(!result.personal_info.unwrap().sharing);
    }

    #[test]
    fn general_knowledge_has_no_locations() {
        let result = QueryAnalyzer::new().classify("What is AQI?");
        assert!(result.locations.is_empty());
    }

    #[test]
    fn classify_is_pure_and_deterministic() {
        let analyzer = QueryAnalyzer::new();
        let a = analyzer.classify("Air quality in Mwanza");
        let b = analyzer.classify("Air quality in Mwanza");
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.locations.len(), b.locations.len());
    }

    #[test]
    fn tool_relevance_boosts_africa_specialist_on_african_query() {
        let analyzer = QueryAnalyzer::new();
        let classification = analyzer.classify("air quality in Kampala");
        let cap = ToolCapability { africa_specialist: true, realtime: true, historical: false, base_confidence: 0.6 };
        let score = analyzer.tool_relevance(&cap, &classification);
        assert!(score > 0.6);
    }

    #[test]
    fn tool_relevance_penalizes_non_historical_tool_on_historical_query() {
        let analyzer = QueryAnalyzer::new();
        let classification = analyzer.classify("air quality trend last week in Lagos");
        let cap = ToolCapability { africa_specialist: true, realtime: true, historical: false, base_confidence: 0.8 };
        let score = analyzer.tool_relevance(&cap, &classification);
        assert!(score < 0.8);
    }

    #[test]
    fn coordinates_are_validated_against_lat_lon_ranges() {
        let result = QueryAnalyzer::new().classify("air quality at 200.0, 30.0");
        assert!(result.locations.iter().all(|l| l.name != "200,30"));
    }
}
