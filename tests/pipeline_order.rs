//! S4: filter-vs-dedup stage ordering must agree on the final verdict
//! for an event that both stages would reject, regardless of which
//! stage runs first.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use zw_core::cluster::MockClusterApiClient;
use zw_core::dedup::{Deduper, DeduperConfig};
use zw_core::event::{RawEvent, RawEventMetadata, RawValue, Severity};
use zw_core::filter::{FilterConfig, FilterRegistry};
use zw_core::pipeline::{Outcome, Pipeline, PipelineConfig, SourceProcessing, StageOrder};
use zw_core::ClusterApiClient;

fn low_severity_event(source: &str, name: &str) -> RawEvent {
    let mut fields = BTreeMap::new();
    fields.insert("severity".to_string(), RawValue::String("low".into()));
    fields.insert("eventType".to_string(), RawValue::String("vulnerability".into()));
    fields.insert("kind".to_string(), RawValue::String("pod".into()));
    fields.insert("name".to_string(), RawValue::String(name.into()));
    RawEvent { source: source.into(), timestamp: Utc::now(), raw_data: RawValue::Object(fields), metadata: RawEventMetadata::default() }
}

fn build_pipeline(order: StageOrder) -> Pipeline {
    let mut filter_configs = HashMap::new();
    filter_configs.insert("trivy".to_string(), FilterConfig { min_severity: Severity::High, ..Default::default() });
    let filters = Arc::new(FilterRegistry::new(filter_configs));
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
        PipelineConfig { default_processing: SourceProcessing { order, ..Default::default() }, ..Default::default() },
    )
}

#[tokio::test]
async fn below_min_severity_is_rejected_under_either_stage_order() {
    for order in [StageOrder::FilterFirst, StageOrder::DedupFirst] {
        let pipeline = build_pipeline(order);
        let outcome = pipeline.process(low_severity_event("trivy", "p1")).await.unwrap();
        assert_eq!(outcome, Outcome::FilteredOut("below_min_severity"));
    }
}

#[tokio::test]
async fn an_admitted_event_is_only_created_once_per_window() {
    for order in [StageOrder::FilterFirst, StageOrder::DedupFirst] {
        let pipeline = build_pipeline(order);
        let first = pipeline.process(low_severity_event("falco", "p2")).await.unwrap();
        let second = pipeline.process(low_severity_event("falco", "p2")).await.unwrap();
        assert_eq!(first, Outcome::Created);
        assert_eq!(second, Outcome::Deduplicated);
    }
}
