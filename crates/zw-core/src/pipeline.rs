//! Composes Filter, Deduper, Normalizer and Creator into the per-event
//! pipeline (spec §4, component C5). Stage order is configurable:
//! `filter_first` evaluates the cheap raw-event preview before paying for
//! normalization or a dedup-state write; `dedup_first` consults the
//! Deduper before the Filter, trading a dedup-state touch for skipping
//! normalization on events the Filter would reject anyway.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster::ClusterApiClient;
use crate::creator;
use crate::dedup::{DedupKey, DedupStrategy, Deduper, Fingerprint, FingerprintProjection};
use crate::error::PipelineError;
use crate::event::RawEvent;
use crate::filter::{self, FilterRegistry};
use crate::metrics as m;
use crate::normalizer::{self, DedupFields, NormalizationMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOrder {
    FilterFirst,
    DedupFirst,
}

impl Default for StageOrder {
    fn default() -> Self {
        StageOrder::FilterFirst
    }
}

/// Per-source Filter/Deduper behavior (spec §3, §4.4): the stage order,
/// which dedup strategy applies, and whether deduplication runs at all
/// for this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProcessing {
    #[serde(default)]
    pub order: StageOrder,
    #[serde(default)]
    pub strategy: DedupStrategy,
    #[serde(default = "default_dedup_enabled")]
    pub dedup_enabled: bool,
}

fn default_dedup_enabled() -> bool {
    true
}

impl Default for SourceProcessing {
    fn default() -> Self {
        Self { order: StageOrder::default(), strategy: DedupStrategy::default(), dedup_enabled: true }
    }
}

fn fingerprint_projection(
    raw: &RawEvent,
    preview: &normalizer::FilterableEvent,
    dedup_fields: &DedupFields,
) -> FingerprintProjection {
    let details = raw.raw_data.as_object().cloned().unwrap_or_default();
    FingerprintProjection {
        source: raw.source.clone(),
        category: Some(preview.category.to_string()),
        severity: Some(preview.severity.to_string()),
        event_type: Some(preview.event_type.clone()),
        resource_kind: preview.resource_kind.clone(),
        resource_name: Some(dedup_fields.resource_name.clone()).filter(|s| !s.is_empty()),
        resource_namespace: preview.namespace.clone(),
        details,
    }
}

/// Outcome of running one raw event through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created,
    FilteredOut(&'static str),
    Deduplicated,
}

#[derive(Clone)]
pub struct PipelineConfig {
    pub default_processing: SourceProcessing,
    pub per_source: HashMap<String, SourceProcessing>,
    pub mappings: HashMap<String, NormalizationMapping>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { default_processing: SourceProcessing::default(), per_source: HashMap::new(), mappings: HashMap::new() }
    }
}

impl PipelineConfig {
    pub fn processing_for(&self, source: &str) -> SourceProcessing {
        self.per_source.get(source).copied().unwrap_or(self.default_processing)
    }
}

/// Ties the four pipeline stages together over shared, hot-reloadable
/// state. Cheap to clone: everything inside is an `Arc`. `config` is an
/// `ArcSwap` rather than a plain `Arc` so the Orchestrator can push
/// per-source reconfiguration (spec §4.6) without recreating the
/// pipeline or racing in-flight `process` calls.
#[derive(Clone)]
pub struct Pipeline {
    filters: Arc<FilterRegistry>,
    deduper: Arc<Deduper>,
    client: Arc<dyn ClusterApiClient>,
    config: Arc<ArcSwap<PipelineConfig>>,
}

impl Pipeline {
    pub fn new(
        filters: Arc<FilterRegistry>,
        deduper: Arc<Deduper>,
        client: Arc<dyn ClusterApiClient>,
        config: PipelineConfig,
    ) -> Self {
        Self { filters, deduper, client, config: Arc::new(ArcSwap::from_pointee(config)) }
    }

    /// Atomically replaces the per-source processing/mapping config.
    /// In-flight `process` calls keep using the config they already
    /// loaded; new calls see the update immediately.
    pub fn reload_config(&self, config: PipelineConfig) {
        self.config.store(Arc::new(config));
    }

    /// Returns the currently active configuration, e.g. so a reconciler
    /// can merge its own updates onto whatever is already live rather
    /// than clobbering unrelated sources.
    pub fn config(&self) -> Arc<PipelineConfig> {
        self.config.load_full()
    }

    /// Runs one raw event through Filter, Deduper, Normalizer and Creator
    /// in the configured order. Stage-local failures are mapped to
    /// [`PipelineError`] and returned rather than panicking, so one bad
    /// event never takes down the adapter feeding it.
    pub async fn process(&self, raw: RawEvent) -> Result<Outcome, PipelineError> {
        let config = self.config.load_full();
        let source = raw.source.clone();
        metrics::counter!(m::EVENTS_PROCESSED_TOTAL, "source" => source.clone()).increment(1);
        if source.is_empty() {
            metrics::counter!(m::PIPELINE_ERRORS_TOTAL, "source" => source.clone(), "stage" => "normalize", "error_type" => "empty_source")
                .increment(1);
            return Err(PipelineError::Normalize {
                source,
                reason: "raw event has an empty source".to_string(),
            });
        }

        let mapping = config.mappings.get(&source).cloned().unwrap_or_default();
        let processing = config.processing_for(&source);
        let preview = normalizer::preview(&raw, &mapping);

        let filter_config = self.filters.get(&source);
        let dedup_fields = normalizer::dedup_fields(&raw, &mapping);
        let namespace = preview.namespace.clone().unwrap_or_default();
        let kind = preview.resource_kind.clone().unwrap_or_default();
        let message = raw.field("message").map(|v| v.to_display_string()).unwrap_or_default();
        let key = DedupKey::new(&source, &namespace, &kind, &dedup_fields.resource_name, &dedup_fields.reason, &message);
        let projection = fingerprint_projection(&raw, &preview, &dedup_fields);

        let should_create = |pipeline: &Self| {
            !processing.dedup_enabled
                || pipeline.deduper.should_create(&source, &key, Some(&projection), processing.strategy)
        };

        match processing.order {
            StageOrder::FilterFirst => {
                if let filter::FilterVerdict::Deny(why) = filter::allow(&preview, &filter_config) {
                    metrics::counter!(m::OBSERVATIONS_FILTERED_TOTAL, "source" => source.clone(), "reason" => why)
                        .increment(1);
                    return Ok(Outcome::FilteredOut(why));
                }
                if !should_create(self) {
                    return Ok(Outcome::Deduplicated);
                }
            }
            StageOrder::DedupFirst => {
                if !should_create(self) {
                    return Ok(Outcome::Deduplicated);
                }
                if let filter::FilterVerdict::Deny(why) = filter::allow(&preview, &filter_config) {
                    metrics::counter!(m::OBSERVATIONS_FILTERED_TOTAL, "source" => source.clone(), "reason" => why)
                        .increment(1);
                    return Ok(Outcome::FilteredOut(why));
                }
            }
        }

        let observation = normalizer::normalize(&raw, &mapping);
        let fingerprint = Fingerprint::compute(&projection);

        match creator::create(self.client.as_ref(), &observation, fingerprint.as_str()).await {
            Ok(_) => {
                metrics::counter!(m::OBSERVATIONS_CREATED_TOTAL, "source" => source.clone()).increment(1);
                debug!(source = %source, "observation created");
                Ok(Outcome::Created)
            }
            Err(crate::error::CreateError::Conflict { name }) => {
                debug!(source = %source, name = %name, "observation already exists, treating as deduplicated");
                Ok(Outcome::Deduplicated)
            }
            Err(err) => {
                metrics::counter!(m::OBSERVATIONS_CREATE_ERRORS_TOTAL, "source" => source.clone(), "error_type" => "fatal")
                    .increment(1);
                metrics::counter!(m::PIPELINE_ERRORS_TOTAL, "source" => source.clone(), "stage" => "create", "error_type" => "fatal")
                    .increment(1);
                warn!(source = %source, error = %err, "create stage failed");
                Err(PipelineError::Create { source, reason: err.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApiClient;
    use crate::dedup::DeduperConfig;
    use crate::event::{RawEventMetadata, RawValue};
    use std::collections::BTreeMap;

    fn make_pipeline(order: StageOrder) -> Pipeline {
        let filters = Arc::new(FilterRegistry::new(HashMap::new()));
        let deduper = Arc::new(Deduper::new(DeduperConfig {
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        }));
        let client: Arc<dyn ClusterApiClient> = Arc::new(MockClusterApiClient::new());
        Pipeline::new(
            filters,
            deduper,
            client,
            PipelineConfig {
                default_processing: SourceProcessing { order, ..Default::default() },
                ..Default::default()
            },
        )
    }

    fn raw_event(source: &str, severity: &str, fields: &[(&str, &str)]) -> RawEvent {
        let mut map = BTreeMap::new();
        map.insert("severity".to_string(), RawValue::String(severity.to_string()));
        for (k, v) in fields {
            map.insert(k.to_string(), RawValue::String(v.to_string()));
        }
        RawEvent {
            source: source.to_string(),
            timestamp: chrono::Utc::now(),
            raw_data: RawValue::Object(map),
            metadata: RawEventMetadata::default(),
        }
    }

    #[tokio::test]
    async fn admitted_event_is_created() {
        let pipeline = make_pipeline(StageOrder::FilterFirst);
        let event = raw_event("trivy", "high", &[("eventType", "vulnerability"), ("kind", "pod"), ("name", "p1")]);
        assert_eq!(pipeline.process(event).await.unwrap(), Outcome::Created);
    }

    #[tokio::test]
    async fn second_identical_event_is_deduplicated_under_either_order() {
        for order in [StageOrder::FilterFirst, StageOrder::DedupFirst] {
            let pipeline = make_pipeline(order);
            let event = || raw_event("trivy", "high", &[("eventType", "vulnerability"), ("kind", "pod"), ("name", "p1")]);
            assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Created);
            assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Deduplicated);
        }
    }

    #[tokio::test]
    async fn empty_source_is_a_pipeline_error() {
        let pipeline = make_pipeline(StageOrder::FilterFirst);
        let event = raw_event("", "high", &[]);
        assert!(pipeline.process(event).await.is_err());
    }

    #[tokio::test]
    async fn disabling_dedup_for_a_source_admits_every_event() {
        let filters = Arc::new(FilterRegistry::new(HashMap::new()));
        let deduper = Arc::new(Deduper::new(DeduperConfig {
            default_rate_per_source: 1_000_000,
            rate_burst: 1_000_000,
            ..Default::default()
        }));
        let client: Arc<dyn ClusterApiClient> = Arc::new(MockClusterApiClient::new());
        let mut per_source = HashMap::new();
        per_source.insert(
            "falco".to_string(),
            SourceProcessing { dedup_enabled: false, ..Default::default() },
        );
        let pipeline = Pipeline::new(
            filters,
            deduper,
            client,
            PipelineConfig { per_source, ..Default::default() },
        );
        let event = || raw_event("falco", "high", &[("eventType", "vulnerability"), ("kind", "pod"), ("name", "p1")]);
        assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Created);
        assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Created);
    }

    #[tokio::test]
    async fn reload_config_takes_effect_on_the_next_call() {
        let pipeline = make_pipeline(StageOrder::FilterFirst);
        let event = || raw_event("trivy", "high", &[("eventType", "vulnerability"), ("kind", "pod"), ("name", "p1")]);
        assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Created);
        assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Deduplicated);

        let mut per_source = HashMap::new();
        per_source.insert("trivy".to_string(), SourceProcessing { dedup_enabled: false, ..Default::default() });
        pipeline.reload_config(PipelineConfig { per_source, ..Default::default() });
        assert_eq!(pipeline.process(event()).await.unwrap(), Outcome::Created);
    }

    #[tokio::test]
    async fn dedup_key_reason_is_distinct_from_event_type() {
        let pipeline = make_pipeline(StageOrder::FilterFirst);
        let with_reason = |reason: &str| {
            raw_event(
                "trivy",
                "high",
                &[("eventType", "vulnerability"), ("kind", "pod"), ("name", "p1"), ("reason", reason)],
            )
        };
        // Same eventType, different `reason`: these must be treated as
        // distinct identities, not collapsed onto one dedup key.
        assert_eq!(pipeline.process(with_reason("CVE-1")).await.unwrap(), Outcome::Created);
        assert_eq!(pipeline.process(with_reason("CVE-2")).await.unwrap(), Outcome::Created);
    }
}
