//! Pluggable dedup strategies over the one engine (spec §4.1).

use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStrategy {
    /// Default: bucket + fingerprint + LRU, unmodified window.
    Fingerprint,
    /// Tight window for high-rate repetitive sources.
    EventStream,
    /// Identity key only; ignores the fingerprint channel entirely.
    Key,
}

impl Default for DedupStrategy {
    fn default() -> Self {
        DedupStrategy::Fingerprint
    }
}

impl DedupStrategy {
    pub fn as_label(self) -> &'static str {
        match self {
            DedupStrategy::Fingerprint => "fingerprint",
            DedupStrategy::EventStream => "event-stream",
            DedupStrategy::Key => "key",
        }
    }

    pub fn consults_fingerprint_channel(self) -> bool {
        !matches!(self, DedupStrategy::Key)
    }

    /// Applies the strategy's window override, if any, on top of the
    /// caller-resolved effective window.
    pub fn effective_window(self, resolved: Duration) -> Duration {
        match self {
            DedupStrategy::EventStream => resolved.min(Duration::minutes(5)),
            DedupStrategy::Fingerprint | DedupStrategy::Key => resolved,
        }
    }
}
