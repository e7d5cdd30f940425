//! The contract every resource domain's fetcher fulfils.

use crate::scraper::ScrapeError;
use async_trait::async_trait;
use prometheus::IntCounter;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Produces a domain snapshot, fresh or cached.
#[async_trait]
pub trait MetricFetcher<T>: Send + Sync {
    /// Returns the current snapshot, running the upstream commands only when
    /// the cached one has expired.
    async fn fetch_metrics(&self) -> Result<Arc<T>, FetchError>;

    /// Errors seen while scraping this domain.
    fn scrape_error(&self) -> &ScrapeErrorCounter;

    /// Duration of the most recent underlying command.
    fn scrape_duration(&self) -> Duration;
}

/// Why a fetch cycle failed.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("failed to decode {command} output: {source}")]
    Decode {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{command} API error response: {message}")]
    Upstream {
        command: &'static str,
        message: String,
    },

    #[error("malformed {command} output: {source}")]
    MalformedRecord {
        command: &'static str,
        #[source]
        source: csv::Error,
    },
}

/// Monotonic error tally of one domain.
///
/// Wraps a Prometheus counter; [`ScrapeErrorCounter::counter`] is registered
/// next to the domain's collector so the tally is exposed as its own family.
#[derive(Clone)]
pub struct ScrapeErrorCounter {
    counter: IntCounter,
}

impl ScrapeErrorCounter {
    pub fn new(name: &str, help: &str) -> prometheus::Result<Self> {
        Ok(Self {
            counter: IntCounter::new(name, help)?,
        })
    }

    pub fn inc(&self) {
        self.counter.inc();
    }

    pub fn add(&self, n: u64) {
        self.counter.inc_by(n);
    }

    pub fn get(&self) -> u64 {
        self.counter.get()
    }

    pub fn counter(&self) -> &IntCounter {
        &self.counter
    }
}
