//! GPU allocation metrics.
//!
//! Total GPUs come from the node listing (`sinfo`), allocated GPUs from the
//! running jobs (`sacct`). Each source is read either through Slurm's JSON
//! output or through the legacy text output, selected once by the `fallback`
//! flag.

pub mod fallback;
pub mod json;

use crate::config::Config;
use crate::fetcher::{FetchError, MetricFetcher, ScrapeErrorCounter};
use crate::gres::parse_gres_gpu_count;
use crate::scraper::{CliScraper, Scraper};
use async_trait::async_trait;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Gauge, Registry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, warn};

pub use fallback::GpuCliFallbackFetcher;
pub use json::GpuJsonFetcher;

pub(crate) const SCRAPE_ERRORS: &str = "gpu_scrape_errors";
pub(crate) const SCRAPE_ERRORS_HELP: &str = "GPU scrape errors";

const ALLOC: (&str, &str) = ("slurm_gpus_alloc", "Allocated GPUs");
const IDLE: (&str, &str) = ("slurm_gpus_idle", "Idle GPUs");
const TOTAL: (&str, &str) = ("slurm_gpus_total", "Total GPUs");
const UTILIZATION: (&str, &str) = ("slurm_gpus_utilization", "Total GPU utilization");

/// Cluster-wide GPU counts at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpuMetrics {
    pub alloc: f64,
    pub idle: f64,
    pub total: f64,
    pub utilization: f64,
}

impl GpuMetrics {
    /// Derives idle and utilization from the raw counts.
    pub fn from_counts(total: f64, alloc: f64) -> Self {
        if alloc > total {
            warn!(total, alloc, "More GPUs allocated than present on listed nodes");
        }
        let utilization = if total > 0.0 { alloc / total } else { 0.0 };
        Self {
            alloc,
            idle: total - alloc,
            total,
            utilization,
        }
    }
}

/// Sums the GPUs of a node listing, counting each named node once.
///
/// Slurm lists a node once per partition it belongs to; entries without a
/// name are always counted.
pub(crate) fn sum_node_gpus<'a, I>(nodes: I) -> f64
where
    I: IntoIterator<Item = (Option<&'a str>, &'a str)>,
{
    let mut seen = HashSet::new();
    nodes
        .into_iter()
        .filter(|(name, _)| match name {
            Some(name) if !name.is_empty() => seen.insert(*name),
            _ => true,
        })
        .map(|(_, gres)| parse_gres_gpu_count(gres))
        .sum()
}

/// The fetcher backing the GPU collector.
pub enum GpuFetcher {
    Json(GpuJsonFetcher),
    CliFallback(GpuCliFallbackFetcher),
}

impl GpuFetcher {
    /// Builds the variant selected by `collectors.fallback`, with scrapers
    /// bound to the configured argument vectors.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let fallback = config.collectors.fallback;
        let timeout = config.commands.timeout();
        let sinfo: Arc<dyn Scraper> = Arc::new(CliScraper::new(
            config.commands.sinfo_gpu_args(fallback),
            timeout,
        )?);
        let sacct: Arc<dyn Scraper> = Arc::new(CliScraper::new(
            config.commands.sacct_gpu_args(fallback),
            timeout,
        )?);

        Ok(if fallback {
            GpuFetcher::CliFallback(GpuCliFallbackFetcher::new(sinfo, sacct, config.poll_limit)?)
        } else {
            GpuFetcher::Json(GpuJsonFetcher::new(sinfo, sacct, config.poll_limit)?)
        })
    }
}

#[async_trait]
impl MetricFetcher<GpuMetrics> for GpuFetcher {
    async fn fetch_metrics(&self) -> Result<Arc<GpuMetrics>, FetchError> {
        match self {
            GpuFetcher::Json(fetcher) => fetcher.fetch_metrics().await,
            GpuFetcher::CliFallback(fetcher) => fetcher.fetch_metrics().await,
        }
    }

    fn scrape_error(&self) -> &ScrapeErrorCounter {
        match self {
            GpuFetcher::Json(fetcher) => fetcher.scrape_error(),
            GpuFetcher::CliFallback(fetcher) => fetcher.scrape_error(),
        }
    }

    fn scrape_duration(&self) -> Duration {
        match self {
            GpuFetcher::Json(fetcher) => fetcher.scrape_duration(),
            GpuFetcher::CliFallback(fetcher) => fetcher.scrape_duration(),
        }
    }
}

/// Exposes [`GpuMetrics`] as four unlabelled gauges.
///
/// `collect` blocks on the fetcher, so the registry holding this collector
/// must be gathered from a blocking thread of the runtime (see
/// [`crate::exposition::Exposition::render`]).
pub struct GpuCollector {
    fetcher: Arc<GpuFetcher>,
    alloc: Gauge,
    idle: Gauge,
    total: Gauge,
    utilization: Gauge,
}

impl GpuCollector {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::with_fetcher(Arc::new(GpuFetcher::from_config(config)?))?)
    }

    /// Wraps an existing fetcher, possibly shared with other consumers.
    pub fn with_fetcher(fetcher: Arc<GpuFetcher>) -> prometheus::Result<Self> {
        Ok(Self {
            fetcher,
            alloc: Gauge::new(ALLOC.0, ALLOC.1)?,
            idle: Gauge::new(IDLE.0, IDLE.1)?,
            total: Gauge::new(TOTAL.0, TOTAL.1)?,
            utilization: Gauge::new(UTILIZATION.0, UTILIZATION.1)?,
        })
    }

    pub fn fetcher(&self) -> &GpuFetcher {
        &self.fetcher
    }

    /// Registers the gauges and the `gpu_scrape_errors` counter.
    pub fn register(self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.fetcher.scrape_error().counter().clone()))?;
        registry.register(Box::new(self))
    }

    fn gauges(&self) -> [&Gauge; 4] {
        [&self.alloc, &self.idle, &self.total, &self.utilization]
    }
}

impl Collector for GpuCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges().into_iter().flat_map(|g| g.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "GPU collector gathered outside the runtime");
                return Vec::new();
            }
        };
        let metrics = match handle.block_on(self.fetcher.fetch_metrics()) {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(error = %e, "Failed to fetch GPU metrics");
                return Vec::new();
            }
        };

        self.alloc.set(metrics.alloc);
        self.idle.set(metrics.idle);
        self.total.set(metrics.total);
        self.utilization.set(metrics.utilization);
        self.gauges().into_iter().flat_map(|g| g.collect()).collect()
    }
}
