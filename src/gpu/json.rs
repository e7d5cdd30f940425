//! GPU fetcher reading the `--json` output of `sinfo` and `sacct`.

use super::{sum_node_gpus, GpuMetrics, SCRAPE_ERRORS, SCRAPE_ERRORS_HELP};
use crate::cache::ThrottledCache;
use crate::fetcher::{FetchError, MetricFetcher, ScrapeErrorCounter};
use crate::gres::parse_gres_gpu_count;
use crate::scraper::Scraper;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Default, Deserialize)]
struct SlurmMeta {
    #[serde(rename = "Slurm", alias = "slurm", default)]
    slurm: Option<SlurmRelease>,
}

#[derive(Debug, Default, Deserialize)]
struct SlurmRelease {
    #[serde(default)]
    release: Option<String>,
}

/// An entry of the `errors` array. Older releases emit bare strings, newer
/// ones structured objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamError {
    Message(String),
    Detail {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Message(message) => f.write_str(message),
            UpstreamError::Detail {
                error: Some(error),
                description: Some(description),
            } if !description.is_empty() => write!(f, "{error}: {description}"),
            UpstreamError::Detail {
                error: Some(message),
                ..
            }
            | UpstreamError::Detail {
                description: Some(message),
                ..
            } => f.write_str(message),
            UpstreamError::Detail { .. } => f.write_str("unspecified error"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SinfoGpuNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    gres: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SinfoGpuResponse {
    #[serde(default)]
    meta: SlurmMeta,
    #[serde(default)]
    errors: Vec<UpstreamError>,
    #[serde(default)]
    nodes: Vec<SinfoGpuNode>,
}

#[derive(Debug, Deserialize)]
struct SacctGpuJob {
    #[serde(default)]
    allocated_gres: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SacctGpuResponse {
    #[serde(default)]
    meta: SlurmMeta,
    #[serde(default)]
    errors: Vec<UpstreamError>,
    #[serde(default)]
    jobs: Vec<SacctGpuJob>,
}

/// Reads GPU totals from `sinfo --json` and allocations from `sacct --json`.
pub struct GpuJsonFetcher {
    sinfo_scraper: Arc<dyn Scraper>,
    sacct_scraper: Arc<dyn Scraper>,
    error_counter: ScrapeErrorCounter,
    cache: ThrottledCache<GpuMetrics>,
}

impl GpuJsonFetcher {
    pub fn new(
        sinfo_scraper: Arc<dyn Scraper>,
        sacct_scraper: Arc<dyn Scraper>,
        poll_limit: f64,
    ) -> prometheus::Result<Self> {
        Ok(Self {
            sinfo_scraper,
            sacct_scraper,
            error_counter: ScrapeErrorCounter::new(SCRAPE_ERRORS, SCRAPE_ERRORS_HELP)?,
            cache: ThrottledCache::new(poll_limit),
        })
    }

    /// Runs sinfo, then sacct. A failed sinfo ends the cycle before sacct
    /// starts.
    async fn fetch(&self) -> Result<GpuMetrics, FetchError> {
        let total = self.fetch_total_gpus().await?;
        let alloc = self.fetch_allocated_gpus().await?;
        Ok(GpuMetrics::from_counts(total, alloc))
    }

    async fn fetch_total_gpus(&self) -> Result<f64, FetchError> {
        let raw = self.sinfo_scraper.fetch_raw_bytes().await?;
        let resp: SinfoGpuResponse = decode("sinfo", &raw)?;
        log_release("sinfo", &resp.meta);
        self.check_errors("sinfo", &resp.errors)?;

        Ok(sum_node_gpus(resp.nodes.iter().map(|node| {
            (node.name.as_deref(), node.gres.as_deref().unwrap_or_default())
        })))
    }

    async fn fetch_allocated_gpus(&self) -> Result<f64, FetchError> {
        let raw = self.sacct_scraper.fetch_raw_bytes().await?;
        let resp: SacctGpuResponse = decode("sacct", &raw)?;
        log_release("sacct", &resp.meta);
        self.check_errors("sacct", &resp.errors)?;

        Ok(resp
            .jobs
            .iter()
            .map(|job| parse_gres_gpu_count(job.allocated_gres.as_deref().unwrap_or_default()))
            .sum())
    }

    /// Fails the cycle when the payload carries errors, counting every one.
    fn check_errors(
        &self,
        command: &'static str,
        errors: &[UpstreamError],
    ) -> Result<(), FetchError> {
        let Some(first) = errors.first() else {
            return Ok(());
        };
        for e in errors {
            error!(command, error = %e, "Slurm API error response");
        }
        self.error_counter.add(errors.len() as u64);
        Err(FetchError::Upstream {
            command,
            message: first.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(command: &'static str, raw: &[u8]) -> Result<T, FetchError> {
    serde_json::from_slice(raw).map_err(|source| {
        error!(command, error = %source, "Unmarshaling GPU metrics");
        FetchError::Decode { command, source }
    })
}

fn log_release(command: &'static str, meta: &SlurmMeta) {
    if let Some(release) = meta.slurm.as_ref().and_then(|s| s.release.as_deref()) {
        debug!(command, release, "Decoded Slurm JSON response");
    }
}

#[async_trait]
impl MetricFetcher<GpuMetrics> for GpuJsonFetcher {
    async fn fetch_metrics(&self) -> Result<Arc<GpuMetrics>, FetchError> {
        self.cache.fetch_with(|| self.fetch()).await
    }

    fn scrape_error(&self) -> &ScrapeErrorCounter {
        &self.error_counter
    }

    fn scrape_duration(&self) -> Duration {
        self.sinfo_scraper.duration()
    }
}
