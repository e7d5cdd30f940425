//! GPU fetcher reading the legacy text output of `sinfo` and `sacct`, for
//! clusters where the `--json` flag is unavailable.

use super::{sum_node_gpus, GpuMetrics, SCRAPE_ERRORS, SCRAPE_ERRORS_HELP};
use crate::cache::ThrottledCache;
use crate::fetcher::{FetchError, MetricFetcher, ScrapeErrorCounter};
use crate::gres::parse_gres_gpu_count;
use crate::scraper::Scraper;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const SINFO_DELIMITER: u8 = b'|';

/// Reads GPU totals from pipe-delimited `sinfo -O` rows and allocations from
/// `sacct --parsable2` lines.
pub struct GpuCliFallbackFetcher {
    sinfo_scraper: Arc<dyn Scraper>,
    sacct_scraper: Arc<dyn Scraper>,
    error_counter: ScrapeErrorCounter,
    cache: ThrottledCache<GpuMetrics>,
}

impl GpuCliFallbackFetcher {
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
        let raw = raw.trim_ascii();
        if raw.is_empty() {
            return Ok(0.0);
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(SINFO_DELIMITER)
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(raw);

        let mut rows = Vec::new();
        for record in reader.records() {
            match record {
                Ok(record) => rows.push(record),
                Err(source) => {
                    error!(error = %source, "Failed to parse sinfo GPU output");
                    self.error_counter.inc();
                    return Err(FetchError::MalformedRecord {
                        command: "sinfo",
                        source,
                    });
                }
            }
        }

        Ok(sum_node_gpus(rows.iter().filter_map(node_gres)))
    }

    async fn fetch_allocated_gpus(&self) -> Result<f64, FetchError> {
        let raw = self.sacct_scraper.fetch_raw_bytes().await?;
        let output = String::from_utf8_lossy(&raw);

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| parse_gres_gpu_count(line.trim_matches('"')))
            .sum())
    }
}

/// Splits one `sinfo` row into its node name and GRES field.
///
/// The GRES column is the last non-empty field (the trailing `|` suffix of
/// `-O` yields an empty one); when more than one field is present the first
/// names the node.
fn node_gres(row: &csv::StringRecord) -> Option<(Option<&str>, &str)> {
    let fields: Vec<&str> = row.iter().filter(|field| !field.is_empty()).collect();
    match fields.as_slice() {
        [] => None,
        [gres] => Some((None, *gres)),
        [node, .., gres] => Some((Some(*node), *gres)),
    }
}

#[async_trait]
impl MetricFetcher<GpuMetrics> for GpuCliFallbackFetcher {
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
