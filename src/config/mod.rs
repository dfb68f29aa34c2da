//! YAML configuration with environment-variable overrides (spec §6).
//!
//! Precedence is file-then-env: the YAML document supplies defaults,
//! and any of the listed environment variables overrides the matching
//! field after the file is parsed.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use zw_core::dedup::DeduperConfig;
use zw_core::pipeline::{SourceProcessing, StageOrder};
use zw_core::{DedupStrategy, FilterConfig, NormalizationMapping};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("could not read config file {}: {source}", path.display()))]
    Read { path: std::path::PathBuf, source: std::io::Error },

    #[snafu(display("could not parse config file {}: {source}", path.display()))]
    Parse { path: std::path::PathBuf, source: serde_yaml::Error },

    #[snafu(display("invalid value for {var}: {value}"))]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    pub bucket_size_seconds: Option<u64>,
    #[serde(default = "default_rate_per_source")]
    pub max_rate_per_source: u32,
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,
    #[serde(default = "default_true")]
    pub enable_aggregation: bool,
    #[serde(default)]
    pub strategy: DedupStrategy,
    #[serde(default)]
    pub window_by_source: HashMap<String, u64>,
}

fn default_window_seconds() -> u64 {
    60
}
fn default_max_size() -> usize {
    10_000
}
fn default_rate_per_source() -> u32 {
    100
}
fn default_rate_burst() -> u32 {
    200
}
fn default_true() -> bool {
    true
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_size: default_max_size(),
            bucket_size_seconds: None,
            max_rate_per_source: default_rate_per_source(),
            rate_burst: default_rate_burst(),
            enable_aggregation: default_true(),
            strategy: DedupStrategy::default(),
            window_by_source: HashMap::new(),
        }
    }
}

impl DedupSettings {
    pub fn to_deduper_config(&self) -> DeduperConfig {
        let default_window = chrono::Duration::seconds(self.window_seconds as i64);
        let bucket_size = self
            .bucket_size_seconds
            .map(|s| chrono::Duration::seconds(s as i64))
            .unwrap_or_else(|| DeduperConfig::bucket_size_for(default_window));
        DeduperConfig {
            default_window,
            source_windows: self
                .window_by_source
                .iter()
                .map(|(k, v)| (k.clone(), chrono::Duration::seconds(*v as i64)))
                .collect(),
            max_size: self.max_size,
            bucket_size,
            default_rate_per_source: self.max_rate_per_source,
            rate_burst: self.rate_burst,
            aggregation_enabled: self.enable_aggregation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_webhook_bind")]
    pub bind_address: String,
    /// Requests per minute admitted per rate-limit key (spec §4.8).
    pub rate_limit_per_minute: Option<u32>,
    pub max_request_bytes: Option<usize>,
    pub basic_auth_username: Option<String>,
    pub basic_auth_password_hash: Option<String>,
    pub bearer_token: Option<String>,
}

fn default_webhook_bind() -> String {
    "0.0.0.0:8088".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InformerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub watched_kinds: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogSourceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Compiled as a list of regex patterns (spec §4.7); named capture
    /// groups are extracted into the emitted raw event's fields.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Container to tail within each pod; the pod's first container if
    /// unset.
    pub container: Option<String>,
    /// How often the watched-pod set is reconciled.
    pub reconcile_interval_seconds: Option<u64>,
}

/// Per-source Filter/Deduper configuration (`SourceConfig.processing`,
/// spec §3/§4.4/§6). Absent fields fall back to the pipeline defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceSettings {
    pub order: Option<StageOrder>,
    pub dedup_enabled: Option<bool>,
    pub dedup_strategy: Option<DedupStrategy>,
    #[serde(default)]
    pub mapping: NormalizationMapping,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineSettings {
    #[serde(default)]
    pub default_order: StageOrder,
    #[serde(default)]
    pub sources: HashMap<String, SourceSettings>,
}

impl PipelineSettings {
    pub fn processing_for(&self, default_strategy: DedupStrategy) -> HashMap<String, SourceProcessing> {
        self.sources
            .iter()
            .map(|(source, settings)| {
                let processing = SourceProcessing {
                    order: settings.order.unwrap_or(self.default_order),
                    strategy: settings.dedup_strategy.unwrap_or(default_strategy),
                    dedup_enabled: settings.dedup_enabled.unwrap_or(true),
                };
                (source.clone(), processing)
            })
            .collect()
    }

    pub fn mappings(&self) -> HashMap<String, NormalizationMapping> {
        self.sources.iter().map(|(source, settings)| (source.clone(), settings.mapping.clone())).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ZenConfig {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub filters: HashMap<String, FilterConfig>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub informer: InformerSettings,
    #[serde(default)]
    pub logs: LogSourceSettings,
}

impl ZenConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadSnafu { path: path.to_path_buf() })?;
        let mut config: ZenConfig = serde_yaml::from_str(&contents).context(ParseSnafu { path: path.to_path_buf() })?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Overlays the spec §6 environment-variable table onto the parsed
    /// file. Variables that are absent leave the file's value untouched.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_u64("DEDUP_WINDOW_SECONDS")? {
            self.dedup.window_seconds = v;
        }
        if let Some(v) = env_parsed::<usize>("DEDUP_MAX_SIZE")? {
            self.dedup.max_size = v;
        }
        if let Some(v) = env_u64("DEDUP_BUCKET_SIZE_SECONDS")? {
            self.dedup.bucket_size_seconds = Some(v);
        }
        if let Some(v) = env_parsed::<u32>("DEDUP_MAX_RATE_PER_SOURCE")? {
            self.dedup.max_rate_per_source = v;
        }
        if let Some(v) = env_parsed::<u32>("DEDUP_RATE_BURST")? {
            self.dedup.rate_burst = v;
        }
        if let Some(v) = env_bool("DEDUP_ENABLE_AGGREGATION")? {
            self.dedup.enable_aggregation = v;
        }
        if let Some(v) = std::env::var("DEDUP_WINDOW_BY_SOURCE").ok() {
            self.dedup.window_by_source = parse_window_by_source(&v)?;
        }
        if let Some(v) = env_parsed::<u32>("WEBHOOK_RATE_LIMIT")? {
            self.webhook.rate_limit_per_minute = Some(v);
        }
        if let Some(v) = env_parsed::<usize>("SERVER_MAX_REQUEST_BYTES")? {
            self.webhook.max_request_bytes = Some(v);
        }
        if let Some(v) = std::env::var("WEBHOOK_BEARER_TOKEN").ok() {
            self.webhook.bearer_token = Some(v);
        }
        if let Some(v) = std::env::var("LOG_LEVEL").ok() {
            self.log_level = Some(v);
        }
        Ok(())
    }
}

/// Parses `source=seconds,source2=seconds2` pairs.
fn parse_window_by_source(raw: &str) -> Result<HashMap<String, u64>, ConfigError> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (name, secs) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidEnv {
                var: "DEDUP_WINDOW_BY_SOURCE".to_string(),
                value: raw.to_string(),
            })?;
            let secs: u64 = secs.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DEDUP_WINDOW_BY_SOURCE".to_string(),
                value: raw.to_string(),
            })?;
            Ok((name.to_string(), secs))
        })
        .collect()
}

fn env_u64(var: &str) -> Result<Option<u64>, ConfigError> {
    env_parsed::<u64>(var)
}

fn env_parsed<T: std::str::FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var: var.to_string(), value }),
        Err(_) => Ok(None),
    }
}

fn env_bool(var: &str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { var: var.to_string(), value }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deduper_defaults() {
        let settings = DedupSettings::default();
        let config = settings.to_deduper_config();
        assert_eq!(config.max_size, 10_000);
        assert_eq!(config.default_rate_per_source, 100);
    }

    #[test]
    fn parses_window_by_source_pairs() {
        let parsed = parse_window_by_source("trivy=120,falco=30").unwrap();
        assert_eq!(parsed.get("trivy"), Some(&120));
        assert_eq!(parsed.get("falco"), Some(&30));
    }

    #[test]
    fn rejects_malformed_window_by_source() {
        assert!(parse_window_by_source("trivy").is_err());
    }
}
