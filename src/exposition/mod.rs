//! # Exposition
//!
//! Turns the metrics registry into one Prometheus text response.
//!
//! ## Components:
//!
//! - **`Exposition`**: gathers every collector registered in a
//!   `prometheus::Registry` for each scrape, drops the families matched by
//!   the exclude filter and encodes the rest with `TextEncoder`.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that serves the rendered response on the configured path.
//!
//! - **`SystemCollector`**: (Defined in `system.rs`) A background task that
//!   periodically samples the exporter's own CPU and memory usage.

pub mod server;
pub mod system;

use anyhow::{Context, Result};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};
use regex::Regex;
use tracing::debug;

pub use server::MetricsServer;
pub use system::SystemCollector;

/// Everything one scrape of the metrics endpoint renders.
#[derive(Clone)]
pub struct Exposition {
    registry: Registry,
    exclude_filter: Option<Regex>,
}

impl Exposition {
    pub fn new(registry: Registry, exclude_filter: Option<Regex>) -> Self {
        Self {
            registry,
            exclude_filter,
        }
    }

    /// Gathers the registry and drops every family whose name matches the
    /// exclude filter.
    ///
    /// Domain collectors block on their fetchers, so this must run on a
    /// blocking thread of the runtime.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families = self.registry.gather();
        if let Some(filter) = &self.exclude_filter {
            families.retain(|family| !filter.is_match(family.get_name()));
        }
        families
    }

    /// Collects every registered collector and renders the response body.
    pub async fn render(&self) -> Result<String> {
        let exposition = self.clone();
        let families = tokio::task::spawn_blocking(move || exposition.gather())
            .await
            .context("metric collection task failed")?;
        debug!(families = families.len(), "Gathered metric families");

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .context("failed to encode metrics")?;
        String::from_utf8(buffer).context("encoded metrics are not UTF-8")
    }
}
