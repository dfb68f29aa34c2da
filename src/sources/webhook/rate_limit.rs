//! Per-endpoint/per-IP webhook rate limiting (spec §4.8), keyed the same
//! way `dedup/ratelimit.rs` keys its per-source limiters — a `DashMap` of
//! `governor` direct limiters — extended with a last-used timestamp per
//! key so stale keys (an endpoint or IP that stopped sending requests)
//! are evicted after an hour rather than growing the map unboundedly.

use std::num::NonZeroU32;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

const KEY_TTL: Duration = Duration::hours(1);
const SWEEP_INTERVAL: Duration = Duration::minutes(5);

struct Entry {
    limiter: DirectLimiter,
    last_used: Mutex<DateTime<Utc>>,
}

pub struct EndpointRateLimiters {
    requests_per_minute: NonZeroU32,
    limiters: DashMap<String, Entry>,
    last_swept: Mutex<DateTime<Utc>>,
}

impl EndpointRateLimiters {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: NonZeroU32::new(requests_per_minute.max(1)).unwrap(),
            limiters: DashMap::new(),
            last_swept: Mutex::new(Utc::now()),
        }
    }

    /// Returns `true` when `key` (an endpoint name or client IP) has a
    /// token available this minute.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.sweep_if_needed(now);

        if !self.limiters.contains_key(key) {
            let quota = Quota::per_minute(self.requests_per_minute);
            self.limiters
                .entry(key.to_string())
                .or_insert_with(|| Entry { limiter: RateLimiter::direct(quota), last_used: Mutex::new(now) });
        }

        let Some(entry) = self.limiters.get(key) else { return true };
        *entry.last_used.lock().expect("rate limiter entry lock poisoned") = now;
        entry.limiter.check().is_ok()
    }

    fn sweep_if_needed(&self, now: DateTime<Utc>) {
        let mut last_swept = self.last_swept.lock().expect("rate limiter sweep lock poisoned");
        if now - *last_swept < SWEEP_INTERVAL {
            return;
        }
        *last_swept = now;
        self.limiters.retain(|_, entry| now - *entry.last_used.lock().expect("rate limiter entry lock poisoned") < KEY_TTL);
    }

    pub fn key_count(&self) -> usize {
        self.limiters.len()
    }
}
