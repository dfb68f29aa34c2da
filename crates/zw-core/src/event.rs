//! In-memory shapes for raw and normalized events (spec §3, component C1).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A dynamically-typed leaf value, preserving the tagged-union shape of
/// adapter payloads instead of erasing them into an opaque blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<RawValue>),
    Object(BTreeMap<String, RawValue>),
}

impl RawValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, RawValue>> {
        match self {
            RawValue::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.as_object().and_then(|m| m.get(key))
    }

    /// Returns the value's human-readable form, used for content the
    /// Fingerprint or dedup-key hash as free text (e.g. a message field).
    pub fn to_display_string(&self) -> String {
        match self {
            RawValue::Null => String::new(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Number(n) => n.to_string(),
            RawValue::String(s) => s.clone(),
            RawValue::Array(_) | RawValue::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Null,
            serde_json::Value::Bool(b) => RawValue::Bool(b),
            serde_json::Value::Number(n) => RawValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => RawValue::String(s),
            serde_json::Value::Array(a) => RawValue::Array(a.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(o) => {
                RawValue::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<RawValue> for serde_json::Value {
    fn from(value: RawValue) -> Self {
        match value {
            RawValue::Null => serde_json::Value::Null,
            RawValue::Bool(b) => serde_json::Value::Bool(b),
            RawValue::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            RawValue::String(s) => serde_json::Value::String(s),
            RawValue::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            RawValue::Object(o) => {
                serde_json::Value::Object(o.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Kind of change an informer-style adapter observed on a watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Delete,
}

/// Adapter-supplied annotations carried alongside a [`RawEvent`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEventMetadata {
    pub event_kind: Option<EventKind>,
    #[serde(default)]
    pub producer_labels: BTreeMap<String, String>,
    pub pod: Option<String>,
    pub container: Option<String>,
    pub namespace: Option<String>,
}

/// Produced by adapters (spec §3, §4.7). `source` MUST be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub raw_data: RawValue,
    pub metadata: RawEventMetadata,
}

impl RawEvent {
    pub fn new(source: impl Into<String>, raw_data: RawValue) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            raw_data,
            metadata: RawEventMetadata::default(),
        }
    }

    pub fn field(&self, key: &str) -> Option<&RawValue> {
        self.raw_data.get(key)
    }
}

/// Closed category vocabulary (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Compliance,
    Performance,
    Operations,
    Cost,
}

/// Closed severity vocabulary, canonical upper-case form (spec §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Ordinal rank used by the Filter's minimum-severity predicate
    /// (CRITICAL=4 ... LOW=1, UNKNOWN=0).
    pub fn ordinal(self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
            Severity::Unknown => 0,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Unknown
    }
}

/// Optional resource reference carried by a normalized observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub api_version: Option<String>,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Result of the Normalizer (spec §3, §4.3). Always has non-empty
/// `source`, `event_type`; `category`/`severity` are closed-set values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedObservation {
    pub source: String,
    pub category: Category,
    pub severity: Severity,
    pub event_type: String,
    pub resource: Option<ResourceRef>,
    #[serde(default)]
    pub details: BTreeMap<String, RawValue>,
    pub detected_at: DateTime<Utc>,
}
