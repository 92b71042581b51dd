//! Process-wide health monitor (§4.11): per-component liveness, error
//! counts, and response-time histograms over a bounded ring per endpoint.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const RING_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseTimeStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl ResponseTimeStats {
    fn from_samples(samples: &VecDeque<u64>) -> Self {
        if samples.is_empty() {
            return Self { count: 0, avg_ms: 0.0, min_ms: 0, max_ms: 0, p95_ms: 0, p99_ms: 0 };
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let pct = |p: f64| -> u64 {
            let idx = ((count as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(count - 1)]
        };
        Self {
            count,
            avg_ms: sum as f64 / count as f64,
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            p95_ms: pct(0.95),
            p99_ms: pct(0.99),
        }
    }
}

struct EndpointRing {
    samples: Mutex<VecDeque<u64>>,
}

impl EndpointRing {
    fn new() -> Self {
        Self { samples: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)) }
    }

    fn record(&self, ms: u64) {
        let mut samples = self.samples.lock().expect("ring lock poisoned");
        if samples.len() == RING_CAPACITY {
            samples.pop_front();
        }
        samples.push_back(ms);
    }

    fn stats(&self) -> ResponseTimeStats {
        ResponseTimeStats::from_samples(&self.samples.lock().expect("ring lock poisoned"))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub uptime_secs: u64,
    pub components: std::collections::HashMap<String, ComponentStatus>,
    pub error_counts: std::collections::HashMap<String, u64>,
}

pub struct HealthMonitor {
    started_at: Instant,
    response_times: DashMap<String, EndpointRing>,
    error_counts: DashMap<String, AtomicU64>,
    component_status: DashMap<String, ComponentStatus>,
    /// Components whose unhealthiness makes the whole system unhealthy
    /// (e.g. a persistent store, if one is configured).
    critical_components: Vec<String>,
}

impl HealthMonitor {
    pub fn new(critical_components: Vec<String>) -> Self {
        Self {
            started_at: Instant::now(),
            response_times: DashMap::new(),
            error_counts: DashMap::new(),
            component_status: DashMap::new(),
            critical_components,
        }
    }

    pub fn record_response_time(&self, endpoint: &str, ms: u64) {
        self.response_times.entry(endpoint.to_string()).or_insert_with(EndpointRing::new).record(ms);
    }

    pub fn record_error(&self, component: &str) {
        self.error_counts.entry(component.to_string()).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
        self.set_component_status(component, ComponentStatus::Degraded);
    }

    pub fn set_component_status(&self, component: &str, status: ComponentStatus) {
        self.component_status.insert(component.to_string(), status);
    }

    pub fn metrics(&self) -> std::collections::HashMap<String, ResponseTimeStats> {
        self.response_times.iter().map(|e| (e.key().clone(), e.value().stats())).collect()
    }

    pub fn check_health(&self, detailed: bool) -> HealthReport {
        let components: std::collections::HashMap<String, ComponentStatus> =
            self.component_status.iter().map(|e| (e.key().clone(), *e.value())).collect();

        let unhealthy_count = components.values().filter(|s| **s == ComponentStatus::Unhealthy).count();
        let degraded_count = components.values().filter(|s| matches!(s, ComponentStatus::Degraded | ComponentStatus::Unhealthy)).count();
        let critical_unhealthy = self
            .critical_components
            .iter()
            .any(|c| components.get(c) == Some(&ComponentStatus::Unhealthy));

        let total = components.len().max(1);
        let status = if critical_unhealthy || unhealthy_count * 2 > total {
            ComponentStatus::Unhealthy
        } else if degraded_count > 0 {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        let error_counts = if detailed {
            self.error_counts.iter().map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed))).collect()
        } else {
            Default::default()
        };

        HealthReport {
            status,
            uptime_secs: self.started_at.elapsed().as_secs(),
            components: if detailed { components } else { Default::default() },
            error_counts,
        }
    }
}
