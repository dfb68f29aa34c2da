//! Per-source predicate evaluation (spec §4.2, component C3). Deterministic,
//! no side effects; configuration is hot-reloadable via an atomically
//! swapped pointer so reads never block the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::event::Category;
use crate::normalizer::FilterableEvent;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeExcludeLists {
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl IncludeExcludeLists {
    fn is_empty(&self) -> bool {
        self.event_types.is_empty()
            && self.kinds.is_empty()
            && self.namespaces.is_empty()
            && self.categories.is_empty()
    }

    fn matches(&self, event: &FilterableEvent) -> bool {
        (!self.event_types.is_empty() && self.event_types.iter().any(|v| v == &event.event_type))
            || (!self.kinds.is_empty()
                && event
                    .resource_kind
                    .as_deref()
                    .is_some_and(|k| self.kinds.iter().any(|v| v == k)))
            || (!self.namespaces.is_empty()
                && event
                    .namespace
                    .as_deref()
                    .is_some_and(|n| self.namespaces.iter().any(|v| v == n)))
            || (!self.categories.is_empty() && self.categories.contains(&event.category))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub min_severity: crate::event::Severity,
    #[serde(default)]
    pub include: IncludeExcludeLists,
    #[serde(default)]
    pub exclude: IncludeExcludeLists,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_severity: crate::event::Severity::Unknown,
            include: IncludeExcludeLists::default(),
            exclude: IncludeExcludeLists::default(),
        }
    }
}

/// Fixed predicate order: enable -> minSeverity -> include -> exclude.
/// The first failing rule wins and is returned as the rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Allow,
    Deny(&'static str),
}

pub fn allow(event: &FilterableEvent, config: &FilterConfig) -> FilterVerdict {
    if !config.enabled {
        return FilterVerdict::Deny("disabled");
    }
    if event.severity.ordinal() < config.min_severity.ordinal() {
        return FilterVerdict::Deny("below_min_severity");
    }
    if !config.include.is_empty() && !config.include.matches(event) {
        return FilterVerdict::Deny("not_included");
    }
    if !config.exclude.is_empty() && config.exclude.matches(event) {
        return FilterVerdict::Deny("excluded");
    }
    FilterVerdict::Allow
}

/// Per-source filter configuration, hot-swappable as one pointer flip.
#[derive(Default)]
pub struct FilterRegistry {
    configs: ArcSwap<HashMap<String, FilterConfig>>,
}

impl FilterRegistry {
    pub fn new(configs: HashMap<String, FilterConfig>) -> Self {
        Self { configs: ArcSwap::from_pointee(configs) }
    }

    pub fn get(&self, source: &str) -> FilterConfig {
        self.configs.load().get(source).cloned().unwrap_or_default()
    }

    /// Atomic swap: never blocks the pipeline, O(1) pointer flip.
    pub fn reload(&self, configs: HashMap<String, FilterConfig>) {
        self.configs.store(Arc::new(configs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;

    fn event(severity: Severity, event_type: &str) -> FilterableEvent {
        FilterableEvent {
            severity,
            event_type: event_type.to_string(),
            resource_kind: Some("Pod".to_string()),
            namespace: Some("default".to_string()),
            category: Category::Security,
        }
    }

    #[test]
    fn disabled_source_denies_everything() {
        let config = FilterConfig { enabled: false, ..Default::default() };
        assert_eq!(allow(&event(Severity::Critical, "x"), &config), FilterVerdict::Deny("disabled"));
    }

    #[test]
    fn below_min_severity_is_denied() {
        let config = FilterConfig { min_severity: Severity::High, ..Default::default() };
        assert_eq!(
            allow(&event(Severity::Low, "x"), &config),
            FilterVerdict::Deny("below_min_severity")
        );
        assert_eq!(allow(&event(Severity::High, "x"), &config), FilterVerdict::Allow);
    }

    #[test]
    fn enable_check_runs_before_severity_check() {
        let config = FilterConfig {
            enabled: false,
            min_severity: Severity::Critical,
            ..Default::default()
        };
        // Even a CRITICAL event is denied for "disabled", not "below_min_severity".
        assert_eq!(
            allow(&event(Severity::Critical, "x"), &config),
            FilterVerdict::Deny("disabled")
        );
    }

    #[test]
    fn allow_is_deterministic() {
        let config = FilterConfig::default();
        let e = event(Severity::Medium, "x");
        assert_eq!(allow(&e, &config), allow(&e, &config));
    }

    #[test]
    fn include_list_rejects_non_members() {
        let config = FilterConfig {
            include: IncludeExcludeLists { event_types: vec!["y".into()], ..Default::default() },
            ..Default::default()
        };
        assert_eq!(allow(&event(Severity::Medium, "x"), &config), FilterVerdict::Deny("not_included"));
    }
}
