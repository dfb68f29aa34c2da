//! Metric name contracts (spec §6). Names and labels are part of the
//! external contract; keep them stable.

pub const EVENTS_PROCESSED_TOTAL: &str = "events_processed_total";
pub const OBSERVATIONS_FILTERED_TOTAL: &str = "observations_filtered_total";
pub const OBSERVATIONS_DEDUPED_TOTAL: &str = "observations_deduped_total";
pub const OBSERVATIONS_CREATED_TOTAL: &str = "observations_created_total";
pub const OBSERVATIONS_CREATE_ERRORS_TOTAL: &str = "observations_create_errors_total";
pub const PIPELINE_ERRORS_TOTAL: &str = "pipeline_errors_total";
pub const DEDUP_EFFECTIVENESS_PER_STRATEGY: &str = "dedup_effectiveness_per_strategy";
pub const DEDUP_DECISIONS_TOTAL: &str = "dedup_decisions_total";
pub const WEBHOOK_REQUESTS_TOTAL: &str = "webhook_requests_total";
pub const WEBHOOK_EVENTS_DROPPED_TOTAL: &str = "webhook_events_dropped_total";
pub const WEBHOOK_RATE_LIMIT_REJECTIONS_TOTAL: &str = "webhook_rate_limit_rejections_total";
pub const EVENTS_DROPPED_TOTAL: &str = "events_dropped_total";

/// `decision` label values for [`DEDUP_DECISIONS_TOTAL`].
pub mod decision {
    pub const CREATE: &str = "create";
    pub const DROP: &str = "drop";
}
