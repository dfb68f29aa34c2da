//! Event model, deduplication, filtering, normalization and the
//! observation-creation pipeline for zen-watcher.

pub mod cluster;
pub mod creator;
pub mod dedup;
pub mod error;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;

pub use cluster::{ClusterApiClient, ClusterApiError, GroupVersionResource, MockClusterApiClient};
pub use dedup::{DedupKey, DedupStrategy, Deduper, DeduperConfig, Fingerprint, FingerprintProjection};
pub use error::{AdapterError, CreateError, PipelineError};
pub use event::{Category, EventKind, NormalizedObservation, RawEvent, RawEventMetadata, RawValue, ResourceRef, Severity};
pub use filter::{FilterConfig, FilterRegistry, FilterVerdict};
pub use normalizer::NormalizationMapping;
pub use pipeline::{Outcome, Pipeline, PipelineConfig, SourceProcessing, StageOrder};
