//! Daily token/cost counters with hard limits (§4.10). Resets at UTC
//! midnight. Atomic counters — no lock needed for the read/write-heavy hot
//! path.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Clone, Debug)]
pub struct CostLimits {
    pub max_requests_per_day: Option<u64>,
    pub max_tokens_per_day: Option<u64>,
    /// Cost in tenths-of-a-cent, to keep the counter integral/atomic.
    pub max_cost_millicents_per_day: Option<u64>,
}

impl Default for CostLimits {
    /// No limits by default — matches §4.10's "local (no-cost) LLM backends
    /// ... limits default to effectively unlimited".
    fn default() -> Self {
        Self { max_requests_per_day: None, max_tokens_per_day: None, max_cost_millicents_per_day: None }
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct CostStatus {
    pub requests_today: u64,
    pub tokens_today: u64,
    pub cost_millicents_today: u64,
    pub day_start: DateTime<Utc>,
}

pub struct CostTracker {
    limits: CostLimits,
    requests: AtomicU64,
    tokens: AtomicU64,
    cost_millicents: AtomicU64,
    day_start_epoch_day: AtomicI64,
}

impl CostTracker {
    pub fn new(limits: CostLimits) -> Self {
        Self {
            limits,
            requests: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            cost_millicents: AtomicU64::new(0),
            day_start_epoch_day: AtomicI64::new(epoch_day(Utc::now())),
        }
    }

    fn roll_if_new_day(&self) {
        let today = epoch_day(Utc::now());
        let stored = self.day_start_epoch_day.load(Ordering::Relaxed);
        if today != stored
            && self.day_start_epoch_day.compare_exchange(stored, today, Ordering::Relaxed, Ordering::Relaxed).is_ok()
        {
            self.requests.store(0, Ordering::Relaxed);
            self.tokens.store(0, Ordering::Relaxed);
            self.cost_millicents.store(0, Ordering::Relaxed);
        }
    }

    /// `(ok, reason)` — `ok=false` means the caller should short-circuit
    /// with a budget-exceeded message rather than making the call.
    pub fn check_limits(&self) -> (bool, Option<String>) {
        self.roll_if_new_day();
        if let Some(max) = self.limits.max_requests_per_day {
            if self.requests.load(Ordering::Relaxed) >= max {
                return (false, Some("daily request limit reached".to_string()));
            }
        }
        if let Some(max) = self.limits.max_tokens_per_day {
            if self.tokens.load(Ordering::Relaxed) >= max {
                return (false, Some("daily token limit reached".to_string()));
            }
        }
        if let Some(max) = self.limits.max_cost_millicents_per_day {
            if self.cost_millicents.load(Ordering::Relaxed) >= max {
                return (false, Some("daily cost limit reached".to_string()));
            }
        }
        (true, None)
    }

    pub fn track(&self, tokens: u64, cost_millicents: u64) {
        self.roll_if_new_day();
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
        self.cost_millicents.fetch_add(cost_millicents, Ordering::Relaxed);
    }

    pub fn status(&self) -> CostStatus {
        self.roll_if_new_day();
        CostStatus {
            requests_today: self.requests.load(Ordering::Relaxed),
            tokens_today: self.tokens.load(Ordering::Relaxed),
            cost_millicents_today: self.cost_millicents.load(Ordering::Relaxed),
            day_start: Utc::now(),
        }
    }
}

fn epoch_day(now: DateTime<Utc>) -> i64 {
    now.timestamp() / 86_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_by_default() {
        let tracker = CostTracker::new(CostLimits::default());
        tracker.track(1_000_000, 1_000_000);
        let (ok, _) = tracker.check_limits();
        assert!(ok);
    }

    #[test]
    fn hard_cap_short_circuits_subsequent_turns() {
        let tracker = CostTracker::new(CostLimits {
            max_requests_per_day: Some(1),
            max_tokens_per_day: None,
            max_cost_millicents_per_day: None,
        });
        tracker.track(100, 10);
        let (ok, reason) = tracker.check_limits();
        assert!(!ok);
        assert!(reason.unwrap().contains("request limit"));
    }
}
