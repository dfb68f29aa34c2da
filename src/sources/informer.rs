//! Dynamic resource watch adapter (spec §4.7, component C7a).
//!
//! Grounded on the desync/other error split in `lib/k8s-runtime`'s
//! `Watcher::invocation::Error`: a desynced watch is recoverable by
//! relisting from scratch, while any other stream error is reported and
//! the watch is retried with backoff.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event as K8sEvent;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tracing::{debug, warn};

use zw_core::event::{EventKind, RawEvent, RawEventMetadata, RawValue};
use zw_core::AdapterError;

use crate::sources::{log_adapter_stopped, raw_event_channel, spawn_consumer, try_send_or_drop, AdapterContext};

pub const SOURCE_NAME: &str = "informer";

fn event_kind_from(event: &watcher::Event<K8sEvent>) -> Option<(EventKind, &K8sEvent)> {
    match event {
        watcher::Event::Apply(obj) => Some((EventKind::Update, obj)),
        watcher::Event::Delete(obj) => Some((EventKind::Delete, obj)),
        watcher::Event::Init | watcher::Event::InitApply(_) | watcher::Event::InitDone => None,
    }
}

fn to_raw_event(kind: EventKind, object: &K8sEvent) -> RawEvent {
    let value = serde_json::to_value(object).unwrap_or(serde_json::Value::Null);
    let namespace = object.metadata.namespace.clone();
    let mut raw = RawEvent::new(SOURCE_NAME, RawValue::from(value));
    raw.metadata = RawEventMetadata { event_kind: Some(kind), namespace, ..Default::default() };
    raw
}

/// Watches cluster `Event` objects across all namespaces and feeds the
/// pipeline. Runs until `ctx.shutdown` is cancelled or the watch stream
/// ends with a fatal error.
pub async fn run(ctx: AdapterContext, watched_kinds: Vec<String>) -> Result<(), AdapterError> {
    let client = Client::try_default().await.map_err(|err| AdapterError::Fatal {
        source_name: SOURCE_NAME.to_string(),
        reason: format!("could not build kube client: {err}"),
    })?;
    let api: Api<K8sEvent> = Api::all(client);

    debug!(watched_kinds = ?watched_kinds, "starting informer adapter");

    let (tx, rx) = raw_event_channel();
    let consumer = spawn_consumer(SOURCE_NAME, ctx.pipeline.clone(), ctx.health.clone(), rx, ctx.shutdown.child_token());

    let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();
    let result = loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                break Ok(());
            }
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        if let Some((kind, object)) = event_kind_from(&event) {
                            if !watched_kinds.is_empty()
                                && !watched_kinds.iter().any(|k| k == "Event")
                            {
                                continue;
                            }
                            try_send_or_drop(&tx, SOURCE_NAME, to_raw_event(kind, object));
                        }
                    }
                    Some(Err(err)) => {
                        warn!(source = SOURCE_NAME, error = %err, "watch stream error, backing off");
                    }
                    None => {
                        break Err(AdapterError::Transient {
                            source_name: SOURCE_NAME.to_string(),
                            reason: "watch stream ended".to_string(),
                        });
                    }
                }
            }
        }
    };

    drop(tx);
    let _ = consumer.await;
    log_adapter_stopped(SOURCE_NAME);
    result
}
