//! Error taxonomy shared by the pipeline stages (spec §7).

use snafu::Snafu;

/// Errors confined to a single pipeline stage; the pipeline records them
/// under `pipeline_errors_total{stage}` and continues with the next event.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("filter stage failed for source {source}: {reason}"))]
    Filter { source: String, reason: String },

    #[snafu(display("dedup stage failed for source {source}: {reason}"))]
    Dedup { source: String, reason: String },

    #[snafu(display("normalize stage failed for source {source}: {reason}"))]
    Normalize { source: String, reason: String },

    #[snafu(display("create stage failed for source {source}: {reason}"))]
    Create { source: String, reason: String },
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Filter { .. } => "filter",
            PipelineError::Dedup { .. } => "dedup",
            PipelineError::Normalize { .. } => "normalize",
            PipelineError::Create { .. } => "create",
        }
    }

    /// Low-cardinality classification for the `pipeline_errors_total`
    /// `error_type` label — never the free-form `reason` text itself.
    pub fn error_type(&self) -> &'static str {
        match self {
            PipelineError::Filter { .. } => "filter_error",
            PipelineError::Dedup { .. } => "dedup_error",
            PipelineError::Normalize { .. } => "empty_source",
            PipelineError::Create { .. } => "fatal",
        }
    }

    pub fn source(&self) -> &str {
        match self {
            PipelineError::Filter { source, .. }
            | PipelineError::Dedup { source, .. }
            | PipelineError::Normalize { source, .. }
            | PipelineError::Create { source, .. } => source,
        }
    }
}

/// Outcome of the Creator's `create` contract (spec §4.5).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CreateError {
    #[snafu(display("observation for {name} already exists"))]
    Conflict { name: String },

    #[snafu(display("cluster API transport error: {source}"))]
    Fatal {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors surfaced by a source adapter (spec §4.7, §7). `Configuration`
/// and `Fatal` are never silently swallowed: the Orchestrator decides what
/// happens next (mark source errored and continue, or exit the process).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AdapterError {
    #[snafu(display("transient error in {source_name} adapter: {reason}"))]
    Transient { source_name: String, reason: String },

    #[snafu(display("invalid configuration for {source_name} adapter: {reason}"))]
    Configuration { source_name: String, reason: String },

    #[snafu(display("fatal error starting {source_name} adapter: {reason}"))]
    Fatal { source_name: String, reason: String },
}
