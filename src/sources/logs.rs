//! Container log stream adapter (spec §4.7, component C7c). Selects pods
//! by namespace, streams each pod's chosen container on its own task, and
//! turns lines matching any configured regex into raw events — named
//! capture groups from the matching pattern are extracted into the
//! emitted event's fields. The watched-pod set is reconciled on a poll
//! interval: streams start for pods that appear and stop for pods that
//! disappear, without disturbing any other pod's stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zw_core::event::{RawEvent, RawEventMetadata, RawValue};
use zw_core::AdapterError;

use crate::sources::{log_adapter_stopped, raw_event_channel, spawn_consumer, try_send_or_drop, AdapterContext};

pub const SOURCE_NAME: &str = "logs";

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, AdapterError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|err| AdapterError::Configuration {
                source_name: SOURCE_NAME.to_string(),
                reason: format!("invalid log pattern {p:?}: {err}"),
            })
        })
        .collect()
}

/// Runs the regex list against `line`, returning the named capture groups
/// of the first pattern that matches. `None` captures are skipped. A line
/// matching nothing is not emitted.
fn extract(patterns: &[Regex], line: &str) -> Option<BTreeMap<String, RawValue>> {
    if patterns.is_empty() {
        return Some(BTreeMap::new());
    }
    for re in patterns {
        if let Some(caps) = re.captures(line) {
            let mut fields = BTreeMap::new();
            for name in re.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    fields.insert(name.to_string(), RawValue::String(m.as_str().to_string()));
                }
            }
            return Some(fields);
        }
    }
    None
}

fn line_to_raw_event(namespace: &str, pod: &str, container: &str, line: &str, captures: BTreeMap<String, RawValue>) -> RawEvent {
    let mut fields = captures;
    fields.insert("message".to_string(), RawValue::String(line.to_string()));
    fields.insert("pod".to_string(), RawValue::String(pod.to_string()));
    fields.insert("namespace".to_string(), RawValue::String(namespace.to_string()));
    let mut raw = RawEvent::new(SOURCE_NAME, RawValue::Object(fields));
    raw.metadata = RawEventMetadata {
        pod: Some(pod.to_string()),
        container: Some(container.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    raw
}

/// One pod's log stream: tails continuously (`follow: true`) until the
/// pod's token is cancelled or the stream itself ends (pod gone/restarted;
/// the next reconcile pass will start a fresh task if it's still present).
async fn tail_pod(
    client: Client,
    namespace: String,
    pod_name: String,
    container: Option<String>,
    patterns: Arc<Vec<Regex>>,
    tx: mpsc::Sender<RawEvent>,
    token: CancellationToken,
) {
    let mut log_params = LogParams { follow: true, ..Default::default() };
    if let Some(c) = &container {
        log_params.container = Some(c.clone());
    }

    let pod_api: Api<Pod> = Api::namespaced(client, &namespace);
    let stream = match pod_api.log_stream(&pod_name, &log_params).await {
        Ok(s) => s,
        Err(err) => {
            debug!(source = SOURCE_NAME, pod = %pod_name, error = %err, "could not stream logs");
            return;
        }
    };

    let mut lines = stream.lines();
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            next = lines.next() => {
                match next {
                    Some(Ok(line)) => {
                        if let Some(captures) = extract(&patterns, &line) {
                            let container_label = container.clone().unwrap_or_default();
                            try_send_or_drop(
                                &tx,
                                SOURCE_NAME,
                                line_to_raw_event(&namespace, &pod_name, &container_label, &line, captures),
                            );
                        }
                    }
                    Some(Err(err)) => {
                        debug!(source = SOURCE_NAME, pod = %pod_name, error = %err, "log stream read error");
                    }
                    None => return,
                }
            }
        }
    }
}

async fn list_target_pods(client: &Client, namespaces: &[String]) -> HashMap<(String, String), ()> {
    let target_namespaces: Vec<String> = if namespaces.is_empty() { vec![String::new()] } else { namespaces.to_vec() };
    let mut pods = HashMap::new();
    for ns in &target_namespaces {
        let api: Api<Pod> = if ns.is_empty() { Api::all(client.clone()) } else { Api::namespaced(client.clone(), ns) };
        match api.list(&ListParams::default()).await {
            Ok(list) => {
                for pod in list.items {
                    let Some(name) = pod.metadata.name.clone() else { continue };
                    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
                    pods.insert((namespace, name), ());
                }
            }
            Err(err) => {
                warn!(source = SOURCE_NAME, namespace = %ns, error = %err, "could not list pods");
            }
        }
    }
    pods
}

/// Tails logs for every pod in `namespaces` (all namespaces if empty),
/// reconciling the watched-pod set every `reconcile_interval`. Each pod
/// streams on its own task; `container` picks a specific container name,
/// falling back to the pod's first container when unset.
pub async fn run(
    ctx: AdapterContext,
    namespaces: Vec<String>,
    patterns: Vec<String>,
    container: Option<String>,
    reconcile_interval: StdDuration,
) -> Result<(), AdapterError> {
    let patterns = Arc::new(compile_patterns(&patterns)?);

    let client = Client::try_default().await.map_err(|err| AdapterError::Fatal {
        source_name: SOURCE_NAME.to_string(),
        reason: format!("could not build kube client: {err}"),
    })?;

    let (tx, rx) = raw_event_channel();
    let consumer = spawn_consumer(SOURCE_NAME, ctx.pipeline.clone(), ctx.health.clone(), rx, ctx.shutdown.child_token());

    let mut running: HashMap<(String, String), (CancellationToken, JoinHandle<()>)> = HashMap::new();

    loop {
        let desired = list_target_pods(&client, &namespaces).await;

        running.retain(|key, (token, _handle)| {
            let keep = desired.contains_key(key);
            if !keep {
                token.cancel();
            }
            keep
        });

        for (namespace, pod_name) in desired.keys() {
            if running.contains_key(&(namespace.clone(), pod_name.clone())) {
                continue;
            }
            let token = ctx.shutdown.child_token();
            let handle = tokio::spawn(tail_pod(
                client.clone(),
                namespace.clone(),
                pod_name.clone(),
                container.clone(),
                patterns.clone(),
                tx.clone(),
                token.clone(),
            ));
            running.insert((namespace.clone(), pod_name.clone()), (token, handle));
        }

        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconcile_interval) => {}
        }
    }

    for (token, handle) in running.into_values() {
        token.cancel();
        let _ = handle.await;
    }
    drop(tx);
    let _ = consumer.await;
    log_adapter_stopped(SOURCE_NAME);
    Ok(())
}
