//! Source adapters (spec §4.7): each observes some external system and
//! turns what it sees into [`zw_core::RawEvent`]s. Every adapter produces
//! onto a bounded channel (spec §2/§4.7/§5) rather than awaiting the
//! pipeline inline, so a slow Creator/cluster API never blocks the
//! adapter's own I/O loop; a dedicated consumer task drains the channel
//! into the pipeline.

#[cfg(feature = "kubernetes")]
pub mod informer;
#[cfg(feature = "kubernetes")]
pub mod logs;
pub mod webhook;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zw_core::pipeline::Pipeline;
use zw_core::RawEvent;

use crate::health::{HealthState, SourceHealth};

/// Bounded channel capacity between an adapter and its pipeline consumer
/// (spec §4.7's default of 100).
pub const CHANNEL_CAPACITY: usize = 100;

pub fn raw_event_channel() -> (mpsc::Sender<RawEvent>, mpsc::Receiver<RawEvent>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Attempts a non-blocking send onto the adapter's channel; a full
/// channel drops the event and increments `events_dropped_total{source}`
/// rather than applying backpressure to the producer loop.
pub(crate) fn try_send_or_drop(tx: &mpsc::Sender<RawEvent>, source: &str, event: RawEvent) {
    if let Err(err) = tx.try_send(event) {
        metrics::counter!(zw_core::metrics::EVENTS_DROPPED_TOTAL, "source" => source.to_string()).increment(1);
        match err {
            mpsc::error::TrySendError::Full(_) => {
                warn!(source, "raw event channel full, dropping event");
            }
            mpsc::error::TrySendError::Closed(_) => {
                warn!(source, "raw event channel closed, dropping event");
            }
        }
    }
}

/// Drains `rx` into `pipeline.process`, racing the shutdown token. Runs
/// until the channel closes (producer dropped its sender) or shutdown is
/// requested, whichever comes first.
pub fn spawn_consumer(
    name: impl Into<String>,
    pipeline: Pipeline,
    health: Arc<HealthState>,
    mut rx: mpsc::Receiver<RawEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let name = name.into();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => process_event(&name, &pipeline, &health, event).await,
                    None => break,
                },
            }
        }
    })
}

/// Runs one raw event through the pipeline, logging and updating health
/// state the same way regardless of which adapter produced the event.
async fn process_event(name: &str, pipeline: &Pipeline, health: &HealthState, event: RawEvent) {
    match pipeline.process(event).await {
        Ok(outcome) => {
            health.set(name, SourceHealth::Running);
            debug!(source = name, outcome = ?outcome, "event processed");
        }
        Err(err) => {
            error!(source = name, error = %err, "pipeline rejected event");
        }
    }
}

/// Shared constructor args every adapter's `run` takes.
pub struct AdapterContext {
    pub pipeline: Pipeline,
    pub health: Arc<HealthState>,
    pub shutdown: CancellationToken,
}

pub fn log_adapter_stopped(name: &str) {
    info!(source = name, "adapter stopped");
}
