//! Command-line entry point (spec §1 [ADDED] process shape).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "zen-watcher", version, about = "Normalizes cluster events into Observation custom resources")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "ZEN_WATCHER_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Overrides the configured log level (trace|debug|info|warn|error).
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}
