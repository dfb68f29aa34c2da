//! Per-source token-bucket rate limiting (spec §3, §5).
//!
//! Each source gets its own `governor` limiter behind a `DashMap` shard, so
//! refilling one source's bucket never contends with another's — only the
//! shard lookup itself is shared, and `governor`'s internal state is
//! lock-free beyond that.

use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use std::collections::HashMap;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct SourceRateLimiters {
    default_rate: NonZeroU32,
    default_burst: NonZeroU32,
    overrides: HashMap<String, (NonZeroU32, NonZeroU32)>,
    limiters: DashMap<String, DirectLimiter>,
}

impl SourceRateLimiters {
    pub fn new(default_rate: u32, default_burst: u32) -> Self {
        Self {
            default_rate: NonZeroU32::new(default_rate.max(1)).unwrap(),
            default_burst: NonZeroU32::new(default_burst.max(1)).unwrap(),
            overrides: HashMap::new(),
            limiters: DashMap::new(),
        }
    }

    pub fn with_override(mut self, source: impl Into<String>, rate: u32, burst: u32) -> Self {
        self.overrides.insert(
            source.into(),
            (
                NonZeroU32::new(rate.max(1)).unwrap(),
                NonZeroU32::new(burst.max(1)).unwrap(),
            ),
        );
        self
    }

    /// Returns `true` when a token was available and consumed.
    pub fn check(&self, source: &str) -> bool {
        if !self.limiters.contains_key(source) {
            let (rate, burst) = self
                .overrides
                .get(source)
                .copied()
                .unwrap_or((self.default_rate, self.default_burst));
            let quota = Quota::per_second(rate).allow_burst(burst);
            self.limiters.entry(source.to_string()).or_insert_with(|| RateLimiter::direct(quota));
        }
        self.limiters.get(source).map(|l| l.check().is_ok()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_first_burst_then_rate_limits() {
        let limiters = SourceRateLimiters::new(10, 10);
        let admitted = (0..15).filter(|_| limiters.check("floody")).count();
        assert_eq!(admitted, 10, "burst of 10 should admit exactly 10 in the same instant");
    }

    #[test]
    fn sources_are_isolated() {
        let limiters = SourceRateLimiters::new(1, 1);
        assert!(limiters.check("a"));
        assert!(!limiters.check("a"));
        assert!(limiters.check("b"), "a separate source must not be affected by a's bucket");
    }
}
