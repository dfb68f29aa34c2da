//! Creates custom-resource objects for admitted observations (spec §4.4,
//! component C6). Name generation is deterministic so retries of the
//! same observation collide with the existing object instead of
//! duplicating it.

use chrono::Utc;
use serde_json::{json, Value};

use crate::cluster::{ClusterApiClient, ClusterApiError, GroupVersionResource};
use crate::error::CreateError;
use crate::event::NormalizedObservation;

pub const OBSERVATION_GROUP: &str = "zen.dev";
pub const OBSERVATION_VERSION: &str = "v1alpha1";
pub const OBSERVATION_RESOURCE: &str = "observations";
pub const OBSERVATION_KIND: &str = "Observation";

pub fn observation_gvr() -> GroupVersionResource {
    GroupVersionResource::new(OBSERVATION_GROUP, OBSERVATION_VERSION, OBSERVATION_RESOURCE)
}

/// Deterministic, DNS-1123-safe name derived from the dedup key's
/// fingerprint hash and the detection time, so two create attempts for
/// the same logical observation collide rather than fork.
pub fn observation_name(observation: &NormalizedObservation, fingerprint_hash: &str) -> String {
    let ts = observation.detected_at.format("%Y%m%dt%H%M%S");
    format!("obs-{ts}-{}", &fingerprint_hash[..fingerprint_hash.len().min(12)])
}

fn observation_namespace(observation: &NormalizedObservation) -> String {
    observation
        .resource
        .as_ref()
        .and_then(|r| r.namespace.clone())
        .unwrap_or_else(|| "default".to_string())
}

fn build_resource(observation: &NormalizedObservation, name: &str, namespace: &str) -> Value {
    json!({
        "apiVersion": format!("{OBSERVATION_GROUP}/{OBSERVATION_VERSION}"),
        "kind": OBSERVATION_KIND,
        "metadata": {
            "name": name,
            "namespace": namespace,
        },
        "spec": {
            "source": observation.source,
            "category": observation.category,
            "severity": observation.severity,
            "eventType": observation.event_type,
            "resource": observation.resource,
            "details": observation.details,
            "detectedAt": observation.detected_at.to_rfc3339(),
            "createdAt": Utc::now().to_rfc3339(),
        },
    })
}

/// Submits the normalized observation as a custom resource. A conflict
/// from the cluster API is surfaced as [`CreateError::Conflict`] rather
/// than treated as fatal — the observation already exists, which is the
/// expected outcome of a retried create.
pub async fn create(
    client: &dyn ClusterApiClient,
    observation: &NormalizedObservation,
    fingerprint_hash: &str,
) -> Result<Value, CreateError> {
    let name = observation_name(observation, fingerprint_hash);
    let namespace = observation_namespace(observation);
    let resource = build_resource(observation, &name, &namespace);

    client
        .create(&observation_gvr(), &namespace, resource)
        .await
        .map_err(|err| match err {
            ClusterApiError::Conflict { name } => CreateError::Conflict { name },
            other => CreateError::Fatal {
                source: Box::new(std::io::Error::other(other.to_string())),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApiClient;
    use crate::event::{Category, ResourceRef, Severity};
    use std::collections::BTreeMap;

    fn observation() -> NormalizedObservation {
        NormalizedObservation {
            source: "trivy".into(),
            category: Category::Security,
            severity: Severity::High,
            event_type: "vulnerability".into(),
            resource: Some(ResourceRef {
                api_version: Some("v1".into()),
                kind: "Pod".into(),
                name: "my-pod".into(),
                namespace: Some("prod".into()),
            }),
            details: BTreeMap::new(),
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_submits_to_the_observation_namespace() {
        let client = MockClusterApiClient::new();
        let obs = observation();
        let result = create(&client, &obs, "abcdef0123456789").await;
        assert!(result.is_ok());
        assert_eq!(client.created_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_surfaces_as_conflict_not_fatal() {
        let client = MockClusterApiClient::new();
        let obs = observation();
        create(&client, &obs, "abcdef0123456789").await.unwrap();
        let second = create(&client, &obs, "abcdef0123456789").await;
        assert!(matches!(second, Err(CreateError::Conflict { .. })));
    }

    #[test]
    fn name_is_deterministic_for_the_same_observation() {
        let obs = observation();
        let a = observation_name(&obs, "abcdef0123456789");
        let b = observation_name(&obs, "abcdef0123456789");
        assert_eq!(a, b);
    }
}
