mod cli;
mod config;
mod health;
mod orchestrator;
mod shutdown;
mod sourceconfig;
mod sources;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zw_core::cluster::ClusterApiClient;
#[cfg(not(feature = "kubernetes"))]
use zw_core::cluster::MockClusterApiClient;
use zw_core::dedup::Deduper;
use zw_core::filter::FilterRegistry;
use zw_core::pipeline::{Pipeline, PipelineConfig};

use crate::cli::Args;
use crate::config::ZenConfig;
use crate::health::HealthState;
use crate::orchestrator::Orchestrator;
use crate::shutdown::{wait_for_signal, ShutdownHandle};

/// Builds the cluster API client: a real `kube::Client`-backed one when
/// compiled with the `kubernetes` feature (the default), falling back to
/// the in-memory mock otherwise (e.g. unit testing outside a cluster).
#[cfg(feature = "kubernetes")]
async fn build_cluster_client() -> anyhow::Result<Arc<dyn ClusterApiClient>> {
    let client = kube::Client::try_default().await.context("failed to build kube client")?;
    Ok(Arc::new(zw_core::cluster::KubeClusterApiClient::new(client)))
}

#[cfg(not(feature = "kubernetes"))]
async fn build_cluster_client() -> anyhow::Result<Arc<dyn ClusterApiClient>> {
    Ok(Arc::new(MockClusterApiClient::new()))
}

fn init_logging(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ZenConfig::load(&args.config).context("failed to load configuration")?;
    init_logging(args.log_level.as_deref().or(config.log_level.as_deref()));

    tracing::info!(config = %args.config.display(), "starting zen-watcher");

    let deduper = Arc::new(Deduper::new(config.dedup.to_deduper_config()));
    let filters = Arc::new(FilterRegistry::new(config.filters.clone()));
    let client = build_cluster_client().await.context("failed to build cluster API client")?;

    let default_processing = zw_core::pipeline::SourceProcessing {
        order: config.pipeline.default_order,
        strategy: config.dedup.strategy,
        dedup_enabled: true,
    };
    let pipeline = Pipeline::new(
        filters,
        deduper,
        client.clone(),
        PipelineConfig {
            default_processing,
            per_source: config.pipeline.processing_for(config.dedup.strategy),
            mappings: config.pipeline.mappings(),
        },
    );

    let health = Arc::new(HealthState::new());
    let shutdown = ShutdownHandle::new();

    let mut orchestrator = Orchestrator::new(shutdown.clone(), client);
    orchestrator.start(&config, pipeline, health);

    wait_for_signal().await;
    tracing::info!("shutdown signal received, stopping adapters");
    orchestrator.shutdown().await;

    Ok(())
}
