//! `SourceConfig` custom resource (spec §6): the cluster-native way to
//! configure a source's ingester and per-source pipeline processing,
//! reconciled by the Orchestrator instead of (or alongside) the static
//! YAML file.

use serde::{Deserialize, Serialize};

use zw_core::pipeline::StageOrder;
use zw_core::{DedupStrategy, NormalizationMapping};

pub const GROUP: &str = "zenwatcher.io";
pub const VERSION: &str = "v1alpha1";
pub const PLURAL: &str = "sourceconfigs";

/// Which adapter ingests events for this source. Mirrors the statically
/// configured `webhook`/`informer`/`logs` sections of `ZenConfig`, minus
/// the parts (bind address, credentials) that stay operator-managed
/// secrets rather than CR fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum IngesterSpec {
    Webhook,
    Informer { watched_kinds: Vec<String> },
    Logs { namespaces: Vec<String>, patterns: Vec<String>, container: Option<String> },
}

/// Per-source processing overrides (`SourceConfig.processing`, spec
/// §3/§4.4/§6). Absent fields fall back to the pipeline defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSpec {
    pub order: Option<StageOrder>,
    pub dedup_enabled: Option<bool>,
    pub dedup_strategy: Option<DedupStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfigSpec {
    pub source: String,
    pub ingester: IngesterSpec,
    #[serde(default)]
    pub processing: ProcessingSpec,
    #[serde(default)]
    pub mapping: NormalizationMapping,
}

/// Extracts and deserializes the `spec` field of each object in `objects`,
/// skipping (and logging) any that don't parse rather than failing the
/// whole reconcile pass over one malformed CR.
pub fn parse_source_configs(objects: Vec<serde_json::Value>) -> Vec<SourceConfigSpec> {
    objects
        .into_iter()
        .filter_map(|object| {
            let spec = object.get("spec")?.clone();
            match serde_json::from_value::<SourceConfigSpec>(spec) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed SourceConfig");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_webhook_source_config() {
        let object = serde_json::json!({
            "apiVersion": "zenwatcher.io/v1alpha1",
            "kind": "SourceConfig",
            "metadata": {"name": "trivy"},
            "spec": {
                "source": "trivy",
                "ingester": {"type": "webhook"},
                "processing": {"order": "dedup_first", "dedupEnabled": false},
                "mapping": {"event_type_field": "title"},
            },
        });
        let parsed = parse_source_configs(vec![object]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].source, "trivy");
        assert_eq!(parsed[0].processing.order, Some(StageOrder::DedupFirst));
        assert_eq!(parsed[0].processing.dedup_enabled, Some(false));
    }

    #[test]
    fn skips_objects_missing_a_spec() {
        let object = serde_json::json!({"metadata": {"name": "broken"}});
        assert!(parse_source_configs(vec![object]).is_empty());
    }

    #[test]
    fn skips_objects_with_an_unparseable_spec() {
        let object = serde_json::json!({"spec": {"source": "trivy"}});
        assert!(parse_source_configs(vec![object]).is_empty());
    }
}
