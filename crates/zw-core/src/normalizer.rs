//! Maps source-specific payloads onto the uniform `NormalizedObservation`
//! shape (spec §4.3, component C4). Pure; no side effects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Category, NormalizedObservation, RawEvent, RawValue, ResourceRef, Severity};

/// Per-source field mapping: which raw-data keys carry each canonical
/// field. Absent entries fall back to the identically-named raw key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizationMapping {
    pub category: Option<String>,
    pub severity_field: Option<String>,
    pub event_type_field: Option<String>,
    pub resource_kind_field: Option<String>,
    pub resource_name_field: Option<String>,
    pub resource_namespace_field: Option<String>,
    pub timestamp_field: Option<String>,
    /// Raw-data key carrying the dedup identity's `reason` component
    /// (distinct from `event_type_field` — e.g. a k8s `Event`'s own
    /// `reason` field). Defaults to `"reason"`.
    pub reason_field: Option<String>,
}

impl NormalizationMapping {
    fn field<'a>(&'a self, override_key: &'a Option<String>, default_key: &'a str) -> &'a str {
        override_key.as_deref().unwrap_or(default_key)
    }
}

/// The resource name and dedup reason, resolved through the same
/// per-source mapping overrides `normalize()` applies — so a remapped
/// source's dedup identity never diverges from its Observation identity.
#[derive(Debug, Clone, Default)]
pub struct DedupFields {
    pub resource_name: String,
    pub reason: String,
}

pub fn dedup_fields(raw: &RawEvent, mapping: &NormalizationMapping) -> DedupFields {
    let name_key = mapping.field(&mapping.resource_name_field, "name");
    let reason_key = mapping.field(&mapping.reason_field, "reason");
    DedupFields {
        resource_name: resolve_string(raw, name_key).unwrap_or_default(),
        reason: resolve_string(raw, reason_key).unwrap_or_default(),
    }
}

/// Lightweight projection used by the Filter so `filter_first` sources
/// never pay for full normalization before a likely rejection.
#[derive(Debug, Clone)]
pub struct FilterableEvent {
    pub severity: Severity,
    pub event_type: String,
    pub resource_kind: Option<String>,
    pub namespace: Option<String>,
    pub category: Category,
}

/// Closed severity vocabulary mapping (spec §4.3), case-folded before
/// comparison.
pub fn map_severity(raw: &str) -> Severity {
    match raw.to_ascii_uppercase().as_str() {
        "CRITICAL" | "FATAL" | "EMERGENCY" => Severity::Critical,
        "HIGH" | "ERROR" | "ALERT" => Severity::High,
        "MEDIUM" | "WARNING" | "WARN" => Severity::Medium,
        "LOW" | "INFO" | "INFORMATIONAL" => Severity::Low,
        _ => Severity::Unknown,
    }
}

fn map_category(raw: &str) -> Category {
    match raw.to_ascii_lowercase().as_str() {
        "security" => Category::Security,
        "compliance" => Category::Compliance,
        "performance" => Category::Performance,
        "cost" => Category::Cost,
        _ => Category::Operations,
    }
}

fn capitalize_kind(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Permissive timestamp parse, emitted as RFC-3339 UTC. Falls back to
/// "now" for unparseable/missing timestamps rather than erroring — the
/// Normalizer is a pure, infallible function.
fn parse_timestamp(raw: Option<&RawValue>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw else { return fallback };
    let Some(s) = raw.as_str() else {
        if let RawValue::Number(epoch) = raw {
            return DateTime::from_timestamp(*epoch as i64, 0).unwrap_or(fallback);
        }
        return fallback;
    };
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_rfc2822(s).map(|dt| dt.with_timezone(&Utc))
        })
        .unwrap_or(fallback)
}

fn resolve_string(raw: &RawEvent, key: &str) -> Option<String> {
    raw.field(key).map(RawValue::to_display_string)
}

/// Builds the cheap preview used by the Filter, without materializing
/// `details` or touching the resource's name/namespace.
pub fn preview(raw: &RawEvent, mapping: &NormalizationMapping) -> FilterableEvent {
    let severity_key = mapping.field(&mapping.severity_field, "severity");
    let event_type_key = mapping.field(&mapping.event_type_field, "eventType");
    let kind_key = mapping.field(&mapping.resource_kind_field, "kind");

    let severity = resolve_string(raw, severity_key)
        .map(|s| map_severity(&s))
        .unwrap_or(Severity::Unknown);
    let event_type = resolve_string(raw, event_type_key).unwrap_or_default();
    let resource_kind = resolve_string(raw, kind_key).map(|k| capitalize_kind(&k));
    let namespace = raw.metadata.namespace.clone().or_else(|| resolve_string(raw, "namespace"));
    let category = mapping
        .category
        .as_deref()
        .map(map_category)
        .unwrap_or(Category::Operations);

    FilterableEvent { severity, event_type, resource_kind, namespace, category }
}

/// Full normalization (spec §4.3). `details` carries every raw field
/// verbatim for lossless downstream inspection.
pub fn normalize(raw: &RawEvent, mapping: &NormalizationMapping) -> NormalizedObservation {
    let severity_key = mapping.field(&mapping.severity_field, "severity");
    let event_type_key = mapping.field(&mapping.event_type_field, "eventType");
    let kind_key = mapping.field(&mapping.resource_kind_field, "kind");
    let name_key = mapping.field(&mapping.resource_name_field, "name");
    let namespace_key = mapping.field(&mapping.resource_namespace_field, "namespace");
    let timestamp_key = mapping.field(&mapping.timestamp_field, "timestamp");

    let severity = resolve_string(raw, severity_key)
        .map(|s| map_severity(&s))
        .unwrap_or(Severity::Unknown);
    let event_type = resolve_string(raw, event_type_key).unwrap_or_default();
    let category = mapping
        .category
        .as_deref()
        .map(map_category)
        .unwrap_or(Category::Operations);

    let kind = resolve_string(raw, kind_key);
    let name = resolve_string(raw, name_key);
    let namespace = raw.metadata.namespace.clone().or_else(|| resolve_string(raw, namespace_key));

    let resource = kind.map(|k| ResourceRef {
        api_version: resolve_string(raw, "apiVersion"),
        kind: capitalize_kind(&k),
        name: name.unwrap_or_default(),
        namespace,
    });

    let details: BTreeMap<String, RawValue> = raw
        .raw_data
        .as_object()
        .map(|m| m.clone())
        .unwrap_or_default();

    let detected_at = parse_timestamp(raw.field(timestamp_key), raw.timestamp);

    NormalizedObservation {
        source: raw.source.clone(),
        category,
        severity,
        event_type,
        resource,
        details,
        detected_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEventMetadata;
    use std::collections::BTreeMap as Map;

    fn raw_event(fields: &[(&str, RawValue)]) -> RawEvent {
        let mut map = Map::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v.clone());
        }
        RawEvent {
            source: "trivy".into(),
            timestamp: Utc::now(),
            raw_data: RawValue::Object(map),
            metadata: RawEventMetadata::default(),
        }
    }

    #[test]
    fn severity_mapping_is_idempotent_and_closed() {
        for input in ["CRITICAL", "fatal", "Error", "warn", "info", "bogus", ""] {
            let once = map_severity(input);
            let twice = map_severity(&once.to_string());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unknown_severity_maps_to_unknown() {
        assert_eq!(map_severity("nonsense"), Severity::Unknown);
    }

    #[test]
    fn resource_kind_is_capitalized_and_namespace_preserved() {
        let event = raw_event(&[
            ("severity", RawValue::String("high".into())),
            ("eventType", RawValue::String("vulnerability".into())),
            ("kind", RawValue::String("pod".into())),
            ("name", RawValue::String("my-pod".into())),
            ("namespace", RawValue::String("kube-system".into())),
        ]);
        let obs = normalize(&event, &NormalizationMapping::default());
        let resource = obs.resource.unwrap();
        assert_eq!(resource.kind, "Pod");
        assert_eq!(resource.namespace, Some("kube-system".to_string()));
    }

    #[test]
    fn dedup_fields_honor_resource_name_override() {
        let event = raw_event(&[
            ("severity", RawValue::String("high".into())),
            ("reason", RawValue::String("FailedScheduling".into())),
            ("podName", RawValue::String("my-pod".into())),
        ]);
        let mapping = NormalizationMapping { resource_name_field: Some("podName".into()), ..Default::default() };
        let fields = dedup_fields(&event, &mapping);
        assert_eq!(fields.resource_name, "my-pod");
        assert_eq!(fields.reason, "FailedScheduling");
    }

    #[test]
    fn details_carry_every_raw_field_verbatim() {
        let event = raw_event(&[
            ("severity", RawValue::String("high".into())),
            ("vulnerabilityID", RawValue::String("CVE-123".into())),
        ]);
        let obs = normalize(&event, &NormalizationMapping::default());
        assert_eq!(
            obs.details.get("vulnerabilityID"),
            Some(&RawValue::String("CVE-123".into()))
        );
    }
}
