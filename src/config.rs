//! Configuration management for the exporter
//!
//! This module defines the main `Config` struct and its sub-structs. Settings
//! are layered with `figment`: built-in defaults, an optional TOML file,
//! `SLURM_EXPORTER_`-prefixed environment variables, the bare `POLL_LIMIT`
//! and `LOGLEVEL` variables, and finally the command line.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "slurm-exporter.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Seconds a fetched snapshot is served before the commands run again.
    pub poll_limit: f64,
    /// Sample the exporter's own CPU and memory usage.
    pub system_metrics_enabled: bool,
    /// Configuration for the HTTP exposition endpoint.
    pub server: ServerConfig,
    /// Which resource domains are collected, and how.
    pub collectors: CollectorsConfig,
    /// Slurm command lines and their timeout.
    pub commands: CommandConfig,
}

/// Configuration for the HTTP exposition endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// The address the metrics server binds to.
    pub listen_address: String,
    /// The path metrics are served on.
    pub metrics_path: String,
    /// Metric families whose name matches this regex are not exposed.
    pub exclude_filter: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CollectorsConfig {
    /// Expose the `slurm_gpus_*` gauges.
    pub gpus_enabled: bool,
    /// Read the legacy text output instead of `--json`.
    pub fallback: bool,
}

/// Slurm command lines. Overrides are space-separated argument vectors.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CommandConfig {
    pub sinfo_gpu: Option<String>,
    pub sacct_gpu: Option<String>,
    /// Upper bound for a single command invocation.
    pub timeout_seconds: u64,
}

impl CommandConfig {
    /// The `sinfo` command used to count GPUs per node.
    pub fn sinfo_gpu_args(&self, fallback: bool) -> Vec<String> {
        let default: &[&str] = if fallback {
            &["sinfo", "-h", "-N", "-O", "NodeHost:30|,Gres:60|"]
        } else {
            &["sinfo", "--json"]
        };
        resolve_args(self.sinfo_gpu.as_deref(), default)
    }

    /// The `sacct` command used to count GPUs allocated to running jobs.
    pub fn sacct_gpu_args(&self, fallback: bool) -> Vec<String> {
        let default: &[&str] = if fallback {
            &[
                "sacct",
                "-a",
                "-X",
                "--format=AllocGRES",
                "--state=RUNNING",
                "--noheader",
                "--parsable2",
            ]
        } else {
            &[
                "sacct",
                "-a",
                "-X",
                "--format=AllocGRES",
                "--state=RUNNING",
                "--json",
            ]
        };
        resolve_args(self.sacct_gpu.as_deref(), default)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn resolve_args(overridden: Option<&str>, default: &[&str]) -> Vec<String> {
    let args: Vec<String> = overridden
        .unwrap_or_default()
        .split_whitespace()
        .map(String::from)
        .collect();
    if args.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        args
    }
}

impl Config {
    /// Loads the application configuration, layering all sources.
    ///
    /// # Arguments
    /// * `cli` - Parsed command-line arguments; `cli.config` names the TOML
    ///   file, defaulting to `slurm-exporter.toml` in the working directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            // e.g. SLURM_EXPORTER_COLLECTORS__FALLBACK=true
            .merge(Env::prefixed("SLURM_EXPORTER_").split("__"))
            .merge(Env::raw().only(&["POLL_LIMIT"]))
            .merge(Env::raw().only(&["LOGLEVEL"]).map(|_| "log_level".into()))
            .merge(cli)
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would only fail later, at first use.
    pub fn validate(&self) -> Result<()> {
        if !self.poll_limit.is_finite() || self.poll_limit < 0.0 {
            bail!("poll_limit must be a non-negative number of seconds, got {}", self.poll_limit);
        }
        if !self.server.metrics_path.starts_with('/') {
            bail!("metrics_path must start with '/', got {:?}", self.server.metrics_path);
        }
        self.listen_address()?;
        self.exclude_filter()?;
        Ok(())
    }

    pub fn listen_address(&self) -> Result<SocketAddr> {
        self.server
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.server.listen_address))
    }

    /// The compiled exclude filter, `None` when unset or empty.
    pub fn exclude_filter(&self) -> Result<Option<Regex>> {
        match self.server.exclude_filter.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .with_context(|| format!("invalid metrics exclude filter {pattern:?}")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            poll_limit: 10.0,
            system_metrics_enabled: true,
            server: ServerConfig {
                listen_address: "0.0.0.0:9092".to_string(),
                metrics_path: "/metrics".to_string(),
                exclude_filter: None,
            },
            collectors: CollectorsConfig {
                gpus_enabled: false,
                fallback: false,
            },
            commands: CommandConfig {
                sinfo_gpu: None,
                sacct_gpu: None,
                timeout_seconds: 30,
            },
        }
    }
}
