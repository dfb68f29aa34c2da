//! The deduplication engine (spec §4.1, component C2).
//!
//! Three channels are consulted in order on every decision: a per-source
//! token bucket, a content fingerprint with a rolling aggregation count, a
//! time-bucketed identity-key/fingerprint map for O(1) expiry, and finally
//! an LRU map preserved as a secondary channel for bounded memory when no
//! content is supplied. See `should_create_at` for the full procedure.

mod bucket;
mod key;
mod ratelimit;
mod strategy;

pub use bucket::Bucket;
pub use key::{DedupKey, Fingerprint, FingerprintProjection, FINGERPRINTED_DETAIL_FIELDS};
pub use ratelimit::SourceRateLimiters;
pub use strategy::DedupStrategy;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use bucket::bucket_index;

#[derive(Debug, Clone)]
pub struct FingerprintRecord {
    pub last_seen: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct DeduperConfig {
    pub default_window: Duration,
    pub source_windows: HashMap<String, Duration>,
    pub max_size: usize,
    pub bucket_size: Duration,
    pub default_rate_per_source: u32,
    pub rate_burst: u32,
    pub aggregation_enabled: bool,
}

impl Default for DeduperConfig {
    fn default() -> Self {
        let default_window = Duration::seconds(60);
        Self {
            bucket_size: Self::bucket_size_for(default_window),
            default_window,
            source_windows: HashMap::new(),
            max_size: 10_000,
            default_rate_per_source: 100,
            rate_burst: 200,
            aggregation_enabled: true,
        }
    }
}

impl DeduperConfig {
    /// Bucket width defaults to `max(10s, window/10)`.
    pub fn bucket_size_for(window: Duration) -> Duration {
        Duration::seconds((window.num_seconds() / 10).max(10))
    }
}

struct DeduperState {
    buckets: HashMap<i64, Bucket>,
    fingerprints: HashMap<String, FingerprintRecord>,
    lru: LruCache<String, DateTime<Utc>>,
    last_swept_bucket: Option<i64>,
}

/// Time-bucketed + fingerprint + per-source-rate-limited + LRU dedup
/// engine. All state mutations serialize through `state`; the per-source
/// rate limiter map is a separate structure so refilling one source's
/// bucket never blocks another's, nor the dedup decision of an
/// already-rate-limited source.
pub struct Deduper {
    state: RwLock<DeduperState>,
    rate_limiters: SourceRateLimiters,
    default_window_secs: AtomicU64,
    source_windows: ArcSwap<HashMap<String, Duration>>,
    max_size: AtomicUsize,
    bucket_size: Duration,
    aggregation_enabled: bool,
}

impl Deduper {
    pub fn new(config: DeduperConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            state: RwLock::new(DeduperState {
                buckets: HashMap::new(),
                fingerprints: HashMap::new(),
                lru: LruCache::new(NonZeroUsize::new(max_size).unwrap()),
                last_swept_bucket: None,
            }),
            rate_limiters: SourceRateLimiters::new(
                config.default_rate_per_source,
                config.rate_burst,
            ),
            default_window_secs: AtomicU64::new(config.default_window.num_seconds().max(0) as u64),
            source_windows: ArcSwap::from_pointee(config.source_windows),
            max_size: AtomicUsize::new(max_size),
            bucket_size: config.bucket_size,
            aggregation_enabled: config.aggregation_enabled,
        }
    }

    pub fn window_for(&self, source: &str) -> Duration {
        self.source_windows
            .load()
            .get(source)
            .copied()
            .unwrap_or_else(|| Duration::seconds(self.default_window_secs.load(Ordering::Relaxed) as i64))
    }

    fn max_window(&self) -> Duration {
        let default = Duration::seconds(self.default_window_secs.load(Ordering::Relaxed) as i64);
        self.source_windows
            .load()
            .values()
            .copied()
            .fold(default, |acc, w| if w > acc { w } else { acc })
    }

    /// `shouldCreate` evaluated at the current wall-clock time.
    pub fn should_create(
        &self,
        source: &str,
        key: &DedupKey,
        content: Option<&FingerprintProjection>,
        strategy: DedupStrategy,
    ) -> bool {
        self.should_create_at(source, key, content, strategy, Utc::now())
    }

    /// Core decision procedure (spec §4.1), parameterized on `now` so
    /// window-expiry tests don't need to sleep in wall time.
    pub fn should_create_at(
        &self,
        source: &str,
        key: &DedupKey,
        content: Option<&FingerprintProjection>,
        strategy: DedupStrategy,
        now: DateTime<Utc>,
    ) -> bool {
        if !source.is_empty() && !self.rate_limiters.check(source) {
            self.record_decision(strategy, source, false);
            return false;
        }

        let window = strategy.effective_window(self.window_for(source));
        let fingerprint = if strategy.consults_fingerprint_channel() {
            content.map(Fingerprint::compute)
        } else {
            None
        };

        let mut state = self.state.write().expect("dedup state lock poisoned");
        self.sweep_if_needed(&mut state, now);

        if let Some(fp) = &fingerprint {
            if let Some(record) = state.fingerprints.get_mut(fp.as_str()) {
                if now - record.last_seen < window {
                    record.last_seen = now;
                    record.count += 1;
                    drop(state);
                    self.record_decision(strategy, source, false);
                    return false;
                }
            }
        }

        let idx = bucket_index(now, self.bucket_size);
        let key_str = key.to_string();
        let fresh_in_bucket = state
            .buckets
            .get(&idx)
            .map(|b| b.contains_fresh(&key_str, fingerprint.as_ref().map(Fingerprint::as_str), now, self.bucket_size))
            .unwrap_or(false);
        if fresh_in_bucket {
            drop(state);
            self.record_decision(strategy, source, false);
            return false;
        }

        if let Some(last) = state.lru.get(&key_str).copied() {
            if now - last < window {
                state.lru.put(key_str.clone(), now);
                drop(state);
                self.record_decision(strategy, source, false);
                return false;
            }
            state.lru.pop(&key_str);
        }

        state
            .buckets
            .entry(idx)
            .or_default()
            .insert(&key_str, fingerprint.as_ref().map(Fingerprint::as_str), now);

        if let Some(fp) = &fingerprint {
            state
                .fingerprints
                .entry(fp.as_str().to_string())
                .and_modify(|r| {
                    r.last_seen = now;
                    r.count += 1;
                })
                .or_insert(FingerprintRecord { last_seen: now, count: 1 });
        }
        state.lru.put(key_str, now);

        drop(state);
        self.record_decision(strategy, source, true);
        true
    }

    fn sweep_if_needed(&self, state: &mut DeduperState, now: DateTime<Utc>) {
        let idx = bucket_index(now, self.bucket_size);
        if state.last_swept_bucket == Some(idx) {
            return;
        }
        state.last_swept_bucket = Some(idx);

        let horizon = self.max_window();
        let horizon_buckets = (horizon.num_seconds() / self.bucket_size.num_seconds().max(1)).max(1) + 2;
        state.buckets.retain(|b, _| idx - b <= horizon_buckets);
        state
            .fingerprints
            .retain(|_, r| now - r.last_seen < horizon);
    }

    fn record_decision(&self, strategy: DedupStrategy, source: &str, created: bool) {
        use crate::metrics as m;
        metrics::counter!(
            m::DEDUP_DECISIONS_TOTAL,
            "strategy" => strategy.as_label(),
            "source" => source.to_string(),
            "decision" => if created { m::decision::CREATE } else { m::decision::DROP },
        )
        .increment(1);
        if created {
            return;
        }
        if self.aggregation_enabled {
            metrics::counter!(
                m::DEDUP_EFFECTIVENESS_PER_STRATEGY,
                "strategy" => strategy.as_label(),
                "source" => source.to_string(),
            )
            .increment(1);
        }
        metrics::counter!(m::OBSERVATIONS_DEDUPED_TOTAL, "source" => source.to_string()).increment(1);
    }

    /// Hot-reconfigure the cache capacity without a restart; shrinking
    /// evicts LRU-oldest entries until size <= n.
    pub fn set_max_size(&self, n: usize) {
        let n = n.max(1);
        self.max_size.store(n, Ordering::Relaxed);
        let mut state = self.state.write().expect("dedup state lock poisoned");
        state.lru.resize(NonZeroUsize::new(n).unwrap());
    }

    pub fn set_default_window(&self, secs: u64) {
        self.default_window_secs.store(secs, Ordering::Relaxed);
    }

    /// Per-source window map is replaced atomically.
    pub fn set_source_windows(&self, windows: HashMap<String, Duration>) {
        self.source_windows.store(std::sync::Arc::new(windows));
    }

    pub fn clear(&self) {
        let mut state = self.state.write().expect("dedup state lock poisoned");
        state.buckets.clear();
        state.fingerprints.clear();
        state.lru.clear();
        state.last_swept_bucket = None;
    }

    pub fn bucket_count(&self) -> usize {
        self.state.read().expect("dedup state lock poisoned").buckets.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.state.read().expect("dedup state lock poisoned").fingerprints.len()
    }

    pub fn lru_len(&self) -> usize {
        self.state.read().expect("dedup state lock poisoned").lru.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn projection(source: &str, vuln: &str) -> FingerprintProjection {
        let mut details = BTreeMap::new();
        details.insert("vulnerabilityID".to_string(), crate::event::RawValue::String(vuln.into()));
        FingerprintProjection {
            source: source.into(),
            category: Some("security".into()),
            severity: Some("HIGH".into()),
            event_type: Some("vulnerability".into()),
            resource_kind: Some("Pod".into()),
            resource_name: Some("p".into()),
            resource_namespace: Some("default".into()),
            details,
        }
    }

    // S1: dedup by fingerprint, 5s apart, within window.
    #[test]
    fn s1_dedup_by_fingerprint() {
        let deduper = Deduper::new(DeduperConfig {
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        });
        let key = DedupKey::new("trivy", "default", "Pod", "p", "CVE-1", "vuln found");
        let content = projection("trivy", "CVE-1");
        let t0 = Utc::now();

        assert!(deduper.should_create_at("trivy", &key, Some(&content), DedupStrategy::Fingerprint, t0));
        assert!(!deduper.should_create_at(
            "trivy",
            &key,
            Some(&content),
            DedupStrategy::Fingerprint,
            t0 + Duration::seconds(5)
        ));
    }

    // S2: window expiry, 61s apart -> two creations.
    #[test]
    fn s2_window_expiry_admits_after_window() {
        let deduper = Deduper::new(DeduperConfig {
            default_window: Duration::seconds(60),
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        });
        let key = DedupKey::new("trivy", "default", "Pod", "p", "CVE-1", "vuln found");
        let content = projection("trivy", "CVE-1");
        let t0 = Utc::now();

        assert!(deduper.should_create_at("trivy", &key, Some(&content), DedupStrategy::Fingerprint, t0));
        assert!(deduper.should_create_at(
            "trivy",
            &key,
            Some(&content),
            DedupStrategy::Fingerprint,
            t0 + Duration::seconds(61)
        ));
    }

    // S3: rate limit admits exactly burst, rejects the rest.
    #[test]
    fn s3_rate_limit_admits_burst_then_rejects() {
        let deduper = Deduper::new(DeduperConfig {
            default_rate_per_source: 10,
            rate_burst: 10,
            ..Default::default()
        });
        let t0 = Utc::now();
        let mut admitted = 0;
        for i in 0..15 {
            let key = DedupKey::new("floody", "default", "Pod", format!("p{i}"), "r", "m");
            let content = projection("floody", &format!("CVE-{i}"));
            if deduper.should_create_at("floody", &key, Some(&content), DedupStrategy::Fingerprint, t0) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[test]
    fn event_stream_strategy_caps_window_at_five_minutes() {
        let deduper = Deduper::new(DeduperConfig {
            default_window: Duration::minutes(30),
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        });
        let key = DedupKey::new("flapper", "default", "Pod", "p", "r", "m");
        let content = projection("flapper", "CVE-1");
        let t0 = Utc::now();

        assert!(deduper.should_create_at("flapper", &key, Some(&content), DedupStrategy::EventStream, t0));
        // Still within the capped 5-minute window even though the
        // configured default window is 30 minutes.
        assert!(!deduper.should_create_at(
            "flapper",
            &key,
            Some(&content),
            DedupStrategy::EventStream,
            t0 + Duration::minutes(4)
        ));
        assert!(deduper.should_create_at(
            "flapper",
            &key,
            Some(&content),
            DedupStrategy::EventStream,
            t0 + Duration::minutes(6)
        ));
    }

    #[test]
    fn key_strategy_ignores_fingerprint_channel() {
        let deduper = Deduper::new(DeduperConfig {
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        });
        let key = DedupKey::new("explicit", "default", "Pod", "p", "r", "m");
        // Different content, same key: key strategy should still dedup on
        // the second call since it never consults the fingerprint map.
        let t0 = Utc::now();
        assert!(deduper.should_create_at("explicit", &key, Some(&projection("explicit", "CVE-1")), DedupStrategy::Key, t0));
        assert!(!deduper.should_create_at(
            "explicit",
            &key,
            Some(&projection("explicit", "CVE-2")),
            DedupStrategy::Key,
            t0 + Duration::seconds(1)
        ));
    }

    #[test]
    fn set_max_size_shrinks_lru_immediately() {
        let deduper = Deduper::new(DeduperConfig {
            max_size: 10,
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        });
        let t0 = Utc::now();
        for i in 0..10 {
            let key = DedupKey::new("s", "default", "Pod", format!("p{i}"), "r", "m");
            deduper.should_create_at("s", &key, None, DedupStrategy::Key, t0 + Duration::seconds(i));
        }
        assert_eq!(deduper.lru_len(), 10);
        deduper.set_max_size(3);
        assert!(deduper.lru_len() <= 3);
    }
}
