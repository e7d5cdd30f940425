//! slurm-exporter - Prometheus metrics for Slurm cluster resources
//!
//! Each resource domain runs Slurm commands through a [`scraper::Scraper`],
//! turns their output into a snapshot with a [`fetcher::MetricFetcher`]
//! (Slurm's JSON output or the legacy text output), keeps that snapshot in a
//! [`cache::ThrottledCache`] and exposes it as gauges through a
//! `prometheus::core::Collector` registered in the exporter's registry.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod exposition;
pub mod fetcher;
pub mod gpu;
pub mod gres;
pub mod scraper;
pub mod task_manager;
