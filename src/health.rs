//! Process health state (spec §6). Not wired to an HTTP endpoint — out
//! of scope — but adapters and the orchestrator update it so a future
//! `/healthz` handler has something authoritative to read.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceHealth {
    Starting,
    Running,
    Errored,
    Stopped,
}

#[derive(Default)]
pub struct HealthState {
    sources: RwLock<HashMap<String, SourceHealth>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, source: &str, health: SourceHealth) {
        self.sources.write().expect("health state lock poisoned").insert(source.to_string(), health);
    }

    pub fn get(&self, source: &str) -> Option<SourceHealth> {
        self.sources.read().expect("health state lock poisoned").get(source).copied()
    }

    /// The process is ready once every registered source is at least
    /// `Running` or `Errored` (i.e. not still `Starting`).
    pub fn is_ready(&self) -> bool {
        self.sources
            .read()
            .expect("health state lock poisoned")
            .values()
            .all(|h| *h != SourceHealth::Starting)
    }

    pub fn is_live(&self) -> bool {
        self.sources
            .read()
            .expect("health state lock poisoned")
            .values()
            .any(|h| *h == SourceHealth::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_once_all_sources_leave_starting() {
        let health = HealthState::new();
        health.set("webhook", SourceHealth::Starting);
        assert!(!health.is_ready());
        health.set("webhook", SourceHealth::Running);
        assert!(health.is_ready());
    }
}
