//! Cluster API client contract (spec §6): the consumer contract the
//! Creator and Orchestrator depend on, an in-memory mock for tests, and
//! (behind the `kubernetes` feature) a `kube::Client`-backed
//! implementation. Live watch/discovery stay out of this trait — wiring
//! an informer against it is the Orchestrator/Informer adapter's job.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterApiError {
    #[snafu(display("object {name} already exists"))]
    Conflict { name: String },

    #[snafu(display("cluster API transport error: {message}"))]
    Transport { message: String },

    #[snafu(display("object {name} not found"))]
    NotFound { name: String },
}

/// Consumer contract declared in spec §6. `watch` and discovery are
/// intentionally omitted here — wiring a live informer against this
/// trait is the Orchestrator/Informer adapter's job, not this crate's.
#[async_trait]
pub trait ClusterApiClient: Send + Sync {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, ClusterApiError>;

    async fn get(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Value, ClusterApiError>;

    async fn create(&self, gvr: &GroupVersionResource, namespace: &str, object: Value) -> Result<Value, ClusterApiError>;
}

/// In-memory client for tests; keyed by `(gvr, namespace, name)`.
#[derive(Default)]
pub struct MockClusterApiClient {
    objects: Mutex<HashMap<(GroupVersionResource, String, String), Value>>,
}

impl MockClusterApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ClusterApiClient for MockClusterApiClient {
    async fn list(&self, gvr: &GroupVersionResource, namespace: Option<&str>) -> Result<Vec<Value>, ClusterApiError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((g, ns, _), _)| g == gvr && namespace.is_none_or(|n| n == ns))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Value, ClusterApiError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(gvr.clone(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or(ClusterApiError::NotFound { name: name.to_string() })
    }

    async fn create(&self, gvr: &GroupVersionResource, namespace: &str, object: Value) -> Result<Value, ClusterApiError> {
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let mut objects = self.objects.lock().unwrap();
        let key = (gvr.clone(), namespace.to_string(), name.clone());
        if objects.contains_key(&key) {
            return Err(ClusterApiError::Conflict { name });
        }
        objects.insert(key, object.clone());
        Ok(object)
    }
}

/// `kube::Client`-backed implementation of [`ClusterApiClient`], gated
/// behind the `kubernetes` feature (spec §6). Uses `kube`'s dynamic-object
/// API so a single client works across the arbitrary resource kinds
/// (Observation custom resources, SourceConfig custom resources) this
/// crate's consumers name by `GroupVersionResource` alone.
#[cfg(feature = "kubernetes")]
pub struct KubeClusterApiClient {
    client: kube::Client,
}

#[cfg(feature = "kubernetes")]
impl KubeClusterApiClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api_resource(gvr: &GroupVersionResource) -> kube::core::ApiResource {
        kube::core::ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: if gvr.group.is_empty() {
                gvr.version.clone()
            } else {
                format!("{}/{}", gvr.group, gvr.version)
            },
            kind: gvr.resource.clone(),
            plural: gvr.resource.clone(),
        }
    }

    fn api(&self, gvr: &GroupVersionResource, namespace: Option<&str>) -> kube::Api<kube::core::DynamicObject> {
        let ar = Self::api_resource(gvr);
        match namespace {
            Some(ns) => kube::Api::namespaced_with(self.client.clone(), ns, &ar),
            None => kube::Api::all_with(self.client.clone(), &ar),
        }
    }

    fn to_transport_error(err: kube::Error) -> ClusterApiError {
        ClusterApiError::Transport { message: err.to_string() }
    }
}

#[cfg(feature = "kubernetes")]
#[async_trait]
impl ClusterApiClient for KubeClusterApiClient {
    async fn list(&self, gvr: &GroupVersionResource, namespace: Option<&str>) -> Result<Vec<Value>, ClusterApiError> {
        let api = self.api(gvr, namespace);
        let list = api
            .list(&kube::api::ListParams::default())
            .await
            .map_err(Self::to_transport_error)?;
        Ok(list.items.into_iter().map(|obj| serde_json::to_value(obj).unwrap_or(Value::Null)).collect())
    }

    async fn get(&self, gvr: &GroupVersionResource, namespace: &str, name: &str) -> Result<Value, ClusterApiError> {
        let api = self.api(gvr, Some(namespace));
        match api.get(name).await {
            Ok(obj) => Ok(serde_json::to_value(obj).unwrap_or(Value::Null)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(ClusterApiError::NotFound { name: name.to_string() }),
            Err(err) => Err(Self::to_transport_error(err)),
        }
    }

    async fn create(&self, gvr: &GroupVersionResource, namespace: &str, object: Value) -> Result<Value, ClusterApiError> {
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let dynamic_object: kube::core::DynamicObject =
            serde_json::from_value(object).map_err(|err| ClusterApiError::Transport { message: err.to_string() })?;
        let api = self.api(gvr, Some(namespace));
        match api.create(&kube::api::PostParams::default(), &dynamic_object).await {
            Ok(created) => Ok(serde_json::to_value(created).unwrap_or(Value::Null)),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Err(ClusterApiError::Conflict { name }),
            Err(err) => Err(Self::to_transport_error(err)),
        }
    }
}
