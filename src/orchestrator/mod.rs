//! Adapter lifecycle management (spec §4.6, component C8). Starts every
//! enabled source adapter as its own task, reconciles per-source pipeline
//! processing against `SourceConfig` custom resources on an interval, and
//! stops everything idempotently on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use zw_core::cluster::{ClusterApiClient, GroupVersionResource};
use zw_core::pipeline::{Pipeline, PipelineConfig, SourceProcessing};

use crate::config::ZenConfig;
use crate::health::HealthState;
use crate::shutdown::ShutdownHandle;
use crate::sourceconfig;
use crate::sources::webhook;
#[cfg(feature = "kubernetes")]
use crate::sources::AdapterContext;

/// How often the Orchestrator re-lists `SourceConfig` CRs and applies any
/// change to the live pipeline's per-source processing.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    tasks: JoinSet<()>,
    shutdown: ShutdownHandle,
    client: Arc<dyn ClusterApiClient>,
}

impl Orchestrator {
    pub fn new(shutdown: ShutdownHandle, client: Arc<dyn ClusterApiClient>) -> Self {
        Self { tasks: JoinSet::new(), shutdown, client }
    }

    fn webhook_auth(config: &ZenConfig) -> webhook::auth::WebhookAuth {
        if let Some(token) = &config.webhook.bearer_token {
            return webhook::auth::WebhookAuth::Bearer { token: token.clone() };
        }
        match (&config.webhook.basic_auth_username, &config.webhook.basic_auth_password_hash) {
            (Some(username), Some(password_hash)) => webhook::auth::WebhookAuth::Basic(webhook::auth::BasicAuthConfig {
                username: username.clone(),
                password_hash: password_hash.clone(),
            }),
            _ => webhook::auth::WebhookAuth::None,
        }
    }

    /// Spawns every adapter enabled in `config`, plus the `SourceConfig`
    /// reconcile loop. Each task's error is logged on exit rather than
    /// propagated — one adapter failing never takes down the others.
    pub fn start(&mut self, config: &ZenConfig, pipeline: Pipeline, health: Arc<HealthState>) {
        if config.webhook.enabled {
            let settings = webhook::WebhookSettings {
                bind_address: config.webhook.bind_address.parse().unwrap_or_else(|_| ([0, 0, 0, 0], 8088).into()),
                rate_limit_per_minute: config.webhook.rate_limit_per_minute.unwrap_or(100),
                max_request_bytes: config.webhook.max_request_bytes.unwrap_or(1024 * 1024),
                auth: Self::webhook_auth(config),
            };
            let pipeline = pipeline.clone();
            let health = health.clone();
            let token = self.shutdown.child();
            self.tasks.spawn(async move {
                if let Err(err) = webhook::run(pipeline, health, settings, token).await {
                    error!(error = %err, "webhook adapter exited with an error");
                }
            });
        }

        #[cfg(feature = "kubernetes")]
        if config.informer.enabled {
            let ctx = AdapterContext { pipeline: pipeline.clone(), health: health.clone(), shutdown: self.shutdown.child() };
            let watched_kinds = config.informer.watched_kinds.clone();
            self.tasks.spawn(async move {
                if let Err(err) = crate::sources::informer::run(ctx, watched_kinds).await {
                    error!(error = %err, "informer adapter exited with an error");
                }
            });
        }

        #[cfg(feature = "kubernetes")]
        if config.logs.enabled {
            let ctx = AdapterContext { pipeline: pipeline.clone(), health: health.clone(), shutdown: self.shutdown.child() };
            let namespaces = config.logs.namespaces.clone();
            let patterns = config.logs.patterns.clone();
            let container = config.logs.container.clone();
            let reconcile_interval = Duration::from_secs(config.logs.reconcile_interval_seconds.unwrap_or(30));
            self.tasks.spawn(async move {
                if let Err(err) = crate::sources::logs::run(ctx, namespaces, patterns, container, reconcile_interval).await {
                    error!(error = %err, "logs adapter exited with an error");
                }
            });
        }

        let client = self.client.clone();
        let token = self.shutdown.child();
        self.tasks.spawn(async move { Self::reconcile_loop(client, pipeline, token).await });

        info!(adapters = self.tasks.len(), "orchestrator started adapters");
    }

    /// Periodically lists `SourceConfig` CRs and, when any are found,
    /// rebuilds the pipeline's per-source processing from them and
    /// hot-swaps it in with [`Pipeline::reload_config`]. An empty list or
    /// a list error leaves the pipeline's current (YAML-derived)
    /// configuration untouched — the static file is always a valid
    /// fallback, never a thing to blank out on a transient API error.
    async fn reconcile_loop(client: Arc<dyn ClusterApiClient>, pipeline: Pipeline, shutdown: tokio_util::sync::CancellationToken) {
        let gvr = GroupVersionResource::new(sourceconfig::GROUP, sourceconfig::VERSION, sourceconfig::PLURAL);
        loop {
            Self::reconcile_once(&client, &pipeline, &gvr).await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(RECONCILE_INTERVAL) => {}
            }
        }
    }

    async fn reconcile_once(client: &Arc<dyn ClusterApiClient>, pipeline: &Pipeline, gvr: &GroupVersionResource) {
        let objects = match client.list(gvr, None).await {
            Ok(objects) => objects,
            Err(err) => {
                warn!(error = %err, "could not list SourceConfig resources, keeping current pipeline configuration");
                return;
            }
        };
        if objects.is_empty() {
            return;
        }

        let specs = sourceconfig::parse_source_configs(objects);
        if specs.is_empty() {
            return;
        }

        let current = pipeline.config();
        let mut per_source = current.per_source.clone();
        let mut mappings = current.mappings.clone();
        for spec in specs {
            let processing = SourceProcessing {
                order: spec.processing.order.unwrap_or(current.default_processing.order),
                strategy: spec.processing.dedup_strategy.unwrap_or(current.default_processing.strategy),
                dedup_enabled: spec.processing.dedup_enabled.unwrap_or(true),
            };
            per_source.insert(spec.source.clone(), processing);
            mappings.insert(spec.source, spec.mapping);
        }

        info!(sources = per_source.len(), "applying SourceConfig-derived pipeline configuration");
        pipeline.reload_config(PipelineConfig { default_processing: current.default_processing, per_source, mappings });
    }

    /// Cancels every adapter's shutdown token and waits for all tasks to
    /// finish. Calling this more than once is a no-op after the first
    /// call drains `tasks`.
    pub async fn shutdown(&mut self) {
        self.shutdown.trigger();
        while self.tasks.join_next().await.is_some() {}
    }
}
