//! Namespaced KV cache with TTL and query-freshness-aware effective TTLs (§4.1).
//!
//! The store itself is pluggable (in-memory LRU-ish map here; an external KV
//! would implement the same `Cache` trait). Any store error is logged and
//! treated as a miss — cache failures never surface to the caller.

use chrono::{DateTime, Local, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Soft per-namespace cap before oldest entries are evicted.
const SOFT_CAP_PER_NAMESPACE: usize = 1000;
/// Hard wall: entries older than this are swept regardless of TTL.
const HARD_WALL: Duration = Duration::from_secs(4 * 3600);
/// Minimum interval between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Identical query within this window is always served, regardless of TTL math.
pub const USER_EXPECTATION_WINDOW_SECS: i64 = 5 * 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let secs = (now - self.created_at).num_seconds().max(0) as u64;
        Duration::from_secs(secs)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, effective_ttl: Duration) -> bool {
        self.age(now) <= effective_ttl
    }
}

/// Query classes the freshness policy distinguishes. The caller (Agent
/// Pipeline) maps a raw query to one of these before asking for an effective
/// TTL; the cache itself holds no opinion on classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryFreshness {
    Forecast,
    ExplicitCurrent,
    GeneralAirQuality,
    Conversational,
}

/// Computes `effective_ttl(query_type, hour_of_day)` per §4.1.
///
/// Peak pollution hours (local 6-8, 17-23, 0-1) halve the TTL for
/// air-quality/forecast query classes. `now` is a UTC instant; it is
/// converted to the server's local wall clock before reading the hour,
/// matching the original's naive `datetime.now().hour()` (server-local,
/// not UTC) — see `domain/services/agent_service.py:889`.
pub fn effective_ttl(kind: QueryFreshness, now: DateTime<Utc>) -> Duration {
    let base_minutes: u64 = match kind {
        QueryFreshness::Forecast => 60,
        QueryFreshness::ExplicitCurrent => 30,
        QueryFreshness::GeneralAirQuality => 60,
        QueryFreshness::Conversational => 240,
    };
    let hour = now.with_timezone(&Local).hour();
    let is_peak = (6..=8).contains(&hour) || (17..=23).contains(&hour) || hour <= 1;
    let minutes = if is_peak && !matches!(kind, QueryFreshness::Conversational) {
        base_minutes / 2
    } else {
        base_minutes
    };
    Duration::from_secs(minutes.max(1) * 60)
}

/// Stable hex key from a set of key/value pairs. Hashes the sorted
/// `(key, value)` pairs so argument order never changes the key.
pub fn hash_params(pairs: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let mut hasher = Sha256::new();
    for (k, v) in sorted {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"&");
    }
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Option<CacheEntry>;
    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value, ttl: Duration);
    async fn delete(&self, namespace: &str, key: &str);
    async fn clear_namespace(&self, namespace: &str);

    /// Convenience: is `key` fresh right now under `kind`'s policy, or within
    /// the user-expectation window regardless of TTL class?
    async fn get_fresh(
        &self,
        namespace: &str,
        key: &str,
        kind: QueryFreshness,
    ) -> Option<serde_json::Value> {
        let entry = self.get(namespace, key).await?;
        let now = Utc::now();
        if entry.age(now).as_secs() as i64 <= USER_EXPECTATION_WINDOW_SECS {
            return Some(entry.value);
        }
        if entry.is_fresh(now, effective_ttl(kind, now)) {
            Some(entry.value)
        } else {
            None
        }
    }
}

/// In-memory cache backed by `DashMap`, safe for concurrent `Get/Set/Delete`.
/// A single writer's later `Set` wins (DashMap's per-shard lock serializes
/// concurrent writers to the same key).
pub struct InMemoryCache {
    store: DashMap<(String, String), CacheEntry>,
    last_sweep: AtomicI64,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self { store: DashMap::new(), last_sweep: AtomicI64::new(0) }
    }

    /// Background sweep: drop entries older than `HARD_WALL`, at most once
    /// every `SWEEP_INTERVAL`. Cheap no-op call is safe to make on every
    /// write path — the interval guard keeps it rare.
    fn maybe_sweep(&self) {
        let now = Utc::now().timestamp();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now - last < SWEEP_INTERVAL.as_secs() as i64 {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let cutoff = Utc::now() - chrono::Duration::from_std(HARD_WALL).unwrap();
        self.store.retain(|_, v| v.created_at >= cutoff);
        tracing::debug!(remaining = self.store.len(), "cache sweep completed");
    }

    fn evict_oldest_if_over_cap(&self, namespace: &str) {
        let count = self.store.iter().filter(|e| e.key().0 == namespace).count();
        if count <= SOFT_CAP_PER_NAMESPACE {
            return;
        }
        let mut keys: Vec<(String, String, DateTime<Utc>)> = self
            .store
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| (e.key().0.clone(), e.key().1.clone(), e.value().created_at))
            .collect();
        keys.sort_by_key(|(_, _, created)| *created);
        let overflow = count - SOFT_CAP_PER_NAMESPACE;
        for (ns, key, _) in keys.into_iter().take(overflow) {
            self.store.remove(&(ns, key));
        }
    }
}

#[async_trait::async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Option<CacheEntry> {
        self.maybe_sweep();
        self.store.get(&(namespace.to_string(), key.to_string())).map(|e| e.clone())
    }

    async fn set(&self, namespace: &str, key: &str, value: serde_json::Value, ttl: Duration) {
        self.store.insert(
            (namespace.to_string(), key.to_string()),
            CacheEntry {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value,
                created_at: Utc::now(),
                ttl_secs: ttl.as_secs(),
            },
        );
        self.evict_oldest_if_over_cap(namespace);
    }

    async fn delete(&self, namespace: &str, key: &str) {
        self.store.remove(&(namespace.to_string(), key.to_string()));
    }

    async fn clear_namespace(&self, namespace: &str) {
        self.store.retain(|k, _| k.0 != namespace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hash_params_is_order_independent() {
        let a = hash_params(&[("city", "Kampala"), ("metric", "pm25")]);
        let b = hash_params(&[("metric", "pm25"), ("city", "Kampala")]);
        assert_eq!(a, b);
    }

    /// Builds the UTC instant corresponding to a given *local* wall-clock
    /// hour, so these tests exercise local-time peak detection regardless
    /// of the host timezone the suite happens to run in.
    fn utc_at_local_hour(hour: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 7, 28, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn effective_ttl_halves_during_peak_hours() {
        let off_peak = utc_at_local_hour(12);
        let peak = utc_at_local_hour(7);
        let off = effective_ttl(QueryFreshness::GeneralAirQuality, off_peak);
        let on = effective_ttl(QueryFreshness::GeneralAirQuality, peak);
        assert_eq!(off.as_secs(), 60 * 60);
        assert_eq!(on.as_secs(), 30 * 60);
    }

    #[test]
    fn effective_ttl_conversational_never_halves() {
        let peak = utc_at_local_hour(18);
        assert_eq!(effective_ttl(QueryFreshness::Conversational, peak).as_secs(), 240 * 60);
    }

    #[tokio::test]
    async fn get_set_delete_roundtrip() {
        let cache = InMemoryCache::new();
        cache.set("aqi", "kampala", serde_json::json!({"pm25": 42}), Duration::from_secs(60)).await;
        let entry = cache.get("aqi", "kampala").await.unwrap();
        assert_eq!(entry.value["pm25"], 42);
        cache.delete("aqi", "kampala").await;
        assert!(cache.get("aqi", "kampala").await.is_none());
    }

    #[tokio::test]
    async fn get_fresh_respects_ttl_expiry() {
        let cache = InMemoryCache::new();
        cache
            .store
            .insert(
                ("aqi".into(), "k".into()),
                CacheEntry {
                    namespace: "aqi".into(),
                    key: "k".into(),
                    value: serde_json::json!(1),
                    created_at: Utc::now() - chrono::Duration::minutes(61),
                    ttl_secs: 3600,
                },
            );
        assert!(cache.get_fresh("aqi", "k", QueryFreshness::GeneralAirQuality).await.is_none());
    }

    #[tokio::test]
    async fn clear_namespace_only_clears_that_namespace() {
        let cache = InMemoryCache::new();
        cache.set("aqi", "a", serde_json::json!(1), Duration::from_secs(60)).await;
        cache.set("forecast", "b", serde_json::json!(2), Duration::from_secs(60)).await;
        cache.clear_namespace("aqi").await;
        assert!(cache.get("aqi", "a").await.is_none());
        assert!(cache.get("forecast", "b").await.is_some());
    }
}
