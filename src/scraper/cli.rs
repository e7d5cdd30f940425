//! Scraper backed by a real subprocess.

use super::{ScrapeError, Scraper};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Runs a fixed command line with a bounded timeout.
#[derive(Debug)]
pub struct CliScraper {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    last_duration_nanos: AtomicU64,
}

impl CliScraper {
    /// Creates a scraper for `argv`, where `argv[0]` is the program name.
    ///
    /// # Arguments
    /// * `argv` - The program followed by its arguments.
    /// * `timeout` - Upper bound for a single invocation.
    pub fn new<I, S>(argv: I, timeout: Duration) -> Result<Self, ScrapeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().ok_or(ScrapeError::EmptyCommand)?;
        Ok(Self {
            program,
            args: argv.collect(),
            timeout,
            last_duration_nanos: AtomicU64::new(0),
        })
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn record_duration(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.last_duration_nanos.store(nanos, Ordering::Relaxed);
    }
}

#[async_trait]
impl Scraper for CliScraper {
    async fn fetch_raw_bytes(&self) -> Result<Vec<u8>, ScrapeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);

        trace!(command = %self.command_line(), "Running scrape command");
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, cmd.output()).await;
        let elapsed = start.elapsed();
        self.record_duration(elapsed);

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ScrapeError::Spawn {
                    command: self.command_line(),
                    source,
                })
            }
            Err(_) => {
                return Err(ScrapeError::Timeout {
                    command: self.command_line(),
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ScrapeError::Exit {
                command: self.command_line(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(
            command = %self.program,
            bytes = output.stdout.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Scrape command finished"
        );
        Ok(output.stdout)
    }

    fn duration(&self) -> Duration {
        Duration::from_nanos(self.last_duration_nanos.load(Ordering::Relaxed))
    }
}
