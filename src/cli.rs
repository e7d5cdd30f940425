//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged on top
//! of the `slurm-exporter.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Prometheus exporter for Slurm cluster resources.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Seconds between two runs of the same Slurm command.
    #[arg(long, value_name = "SECONDS")]
    pub poll_limit: Option<f64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Address to serve metrics on, e.g. 0.0.0.0:9092.
    #[arg(long, value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path to serve metrics on.
    #[arg(long, value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Regex of metric family names to leave out of the response.
    #[arg(long, value_name = "REGEX")]
    pub metrics_exclude_filter: Option<String>,

    /// Collect GPU allocation metrics.
    #[arg(long)]
    pub gpus_enabled: bool,

    /// Parse the legacy text output of the Slurm tools instead of --json.
    #[arg(long)]
    pub fallback: bool,

    /// Replacement command line for the GPU sinfo call.
    #[arg(long, value_name = "CMD")]
    pub sinfo_gpu_override: Option<String>,

    /// Replacement command line for the GPU sacct call.
    #[arg(long, value_name = "CMD")]
    pub sacct_gpu_override: Option<String>,

    /// Timeout for a single Slurm command, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub command_timeout: Option<u64>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();
        let mut server = Dict::new();
        let mut collectors = Dict::new();
        let mut commands = Dict::new();

        if let Some(limit) = self.poll_limit {
            dict.insert("poll_limit".into(), Value::from(limit));
        }
        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(addr) = &self.listen_address {
            server.insert("listen_address".into(), Value::from(addr.clone()));
        }
        if let Some(path) = &self.metrics_path {
            server.insert("metrics_path".into(), Value::from(path.clone()));
        }
        if let Some(filter) = &self.metrics_exclude_filter {
            server.insert("exclude_filter".into(), Value::from(filter.clone()));
        }

        // Switches only ever turn a feature on; leaving one out keeps the
        // value from the file or environment.
        if self.gpus_enabled {
            collectors.insert("gpus_enabled".into(), Value::from(true));
        }
        if self.fallback {
            collectors.insert("fallback".into(), Value::from(true));
        }

        if let Some(cmd) = &self.sinfo_gpu_override {
            commands.insert("sinfo_gpu".into(), Value::from(cmd.clone()));
        }
        if let Some(cmd) = &self.sacct_gpu_override {
            commands.insert("sacct_gpu".into(), Value::from(cmd.clone()));
        }
        if let Some(timeout) = self.command_timeout {
            commands.insert("timeout_seconds".into(), Value::from(timeout));
        }

        for (key, section) in [
            ("server", server),
            ("collectors", collectors),
            ("commands", commands),
        ] {
            if !section.is_empty() {
                dict.insert(key.into(), Value::from(section));
            }
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
