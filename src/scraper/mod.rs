//! Process-execution plumbing for the Slurm command-line tools.
//!
//! A scraper is bound to one fixed argument vector and knows nothing about
//! metrics: it runs the command and hands back the raw bytes together with
//! the wall time the call took.

pub mod cli;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use cli::CliScraper;

/// Runs one external diagnostic command.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Executes the bound command and returns its standard output.
    ///
    /// # Returns
    /// * `Ok(bytes)` with the raw stdout of a successful invocation
    /// * `Err` if the command could not be spawned, exited non-zero or timed out
    async fn fetch_raw_bytes(&self) -> Result<Vec<u8>, ScrapeError>;

    /// Wall time of the most recent invocation.
    fn duration(&self) -> Duration;
}

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("cannot build a scraper from an empty argument vector")]
    EmptyCommand,

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
