//! Identity key and content fingerprint used by the Deduper (spec §3).

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::event::RawValue;

/// Opaque compound identity. The `Display` impl is the canonical storage
/// form used as the bucket/LRU map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub source: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub reason: String,
    pub message_hash: String,
}

impl DedupKey {
    /// `message` is the human-readable message field; its hash becomes
    /// part of the key so otherwise-identical resources with distinct
    /// messages are treated as distinct events.
    pub fn new(
        source: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        message: &str,
    ) -> Self {
        Self {
            source: source.into(),
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
            message_hash: hash_prefix_hex(message.as_bytes(), 8),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.source, self.namespace, self.kind, self.name, self.reason, self.message_hash
        )
    }
}

/// The fixed field selection fingerprinted from normalized/raw content
/// (spec §3). Detail fields outside this fixed set are never hashed.
#[derive(Debug, Clone, Default)]
pub struct FingerprintProjection {
    pub source: String,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub event_type: Option<String>,
    pub resource_kind: Option<String>,
    pub resource_name: Option<String>,
    pub resource_namespace: Option<String>,
    pub details: BTreeMap<String, RawValue>,
}

/// Detail keys that participate in the fingerprint; all others are ignored.
pub const FINGERPRINTED_DETAIL_FIELDS: &[&str] =
    &["vulnerabilityID", "rule", "policy", "reason", "auditID", "checkId"];

#[derive(Serialize)]
struct CanonicalProjection<'a> {
    source: &'a str,
    category: &'a Option<String>,
    severity: &'a Option<String>,
    #[serde(rename = "eventType")]
    event_type: &'a Option<String>,
    resource: CanonicalResource<'a>,
    details: BTreeMap<&'a str, serde_json::Value>,
}

#[derive(Serialize)]
struct CanonicalResource<'a> {
    kind: &'a Option<String>,
    name: &'a Option<String>,
    namespace: &'a Option<String>,
}

/// Hex of the first 16 bytes of SHA-256 over a canonical JSON projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(projection: &FingerprintProjection) -> Self {
        let details: BTreeMap<&str, serde_json::Value> = FINGERPRINTED_DETAIL_FIELDS
            .iter()
            .filter_map(|&k| projection.details.get(k).map(|v| (k, v.clone().into())))
            .collect();

        let canonical = CanonicalProjection {
            source: &projection.source,
            category: &projection.category,
            severity: &projection.severity,
            event_type: &projection.event_type,
            resource: CanonicalResource {
                kind: &projection.resource_kind,
                name: &projection.resource_name,
                namespace: &projection.resource_namespace,
            },
            details,
        };

        // serde_json::Map without the `preserve_order` feature is a
        // BTreeMap, so keys serialize in sorted order for free.
        match serde_json::to_vec(&canonical) {
            Ok(bytes) => Fingerprint(hash_prefix_hex(&bytes, 16)),
            Err(_) => Fingerprint(hash_prefix_hex(format!("{canonical:?}").as_bytes(), 16)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_prefix_hex(bytes: &[u8], prefix_len: usize) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..prefix_len.min(digest.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_regardless_of_detail_insertion_order() {
        let mut details_a = BTreeMap::new();
        details_a.insert("vulnerabilityID".to_string(), RawValue::String("CVE-1".into()));
        details_a.insert("rule".to_string(), RawValue::String("r1".into()));

        let mut details_b = BTreeMap::new();
        details_b.insert("rule".to_string(), RawValue::String("r1".into()));
        details_b.insert("vulnerabilityID".to_string(), RawValue::String("CVE-1".into()));

        let a = FingerprintProjection {
            source: "trivy".into(),
            category: Some("security".into()),
            severity: Some("HIGH".into()),
            event_type: Some("vulnerability".into()),
            resource_kind: Some("Pod".into()),
            resource_name: Some("p".into()),
            resource_namespace: Some("default".into()),
            details: details_a,
        };
        let b = FingerprintProjection { details: details_b, ..a.clone() };

        assert_eq!(Fingerprint::compute(&a), Fingerprint::compute(&b));
    }

    #[test]
    fn fingerprint_ignores_unselected_detail_fields() {
        let mut details_a = BTreeMap::new();
        details_a.insert("vulnerabilityID".to_string(), RawValue::String("CVE-1".into()));
        let mut details_b = details_a.clone();
        details_b.insert("irrelevant".to_string(), RawValue::String("noise".into()));

        let base = FingerprintProjection {
            source: "trivy".into(),
            category: Some("security".into()),
            severity: Some("HIGH".into()),
            event_type: Some("vulnerability".into()),
            resource_kind: Some("Pod".into()),
            resource_name: Some("p".into()),
            resource_namespace: Some("default".into()),
            details: details_a,
        };
        let other = FingerprintProjection { details: details_b, ..base.clone() };

        assert_eq!(Fingerprint::compute(&base), Fingerprint::compute(&other));
    }

    #[test]
    fn dedup_key_display_is_canonical_storage_form() {
        let key = DedupKey::new("trivy", "default", "Pod", "p", "cve", "oh no");
        assert_eq!(key.to_string(), format!("trivy/default/Pod/p/cve/{}", key.message_hash));
    }
}
