use super::{ScrapeError, Scraper};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

enum Source {
    Fixture(PathBuf),
    Bytes(Vec<u8>),
    Failure(String),
}

/// Scraper double that serves stored content with zero duration.
pub struct MockScraper {
    source: Mutex<Source>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockScraper {
    /// Serves the content of a fixture file, read on every call.
    pub fn from_fixture(path: impl AsRef<Path>) -> Self {
        Self::with_source(Source::Fixture(path.as_ref().to_path_buf()))
    }

    /// Serves fixed bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_source(Source::Bytes(bytes.into()))
    }

    /// Fails every call with an I/O error carrying `message`.
    pub fn failing(message: &str) -> Self {
        Self::with_source(Source::Failure(message.to_string()))
    }

    /// Sleeps for `delay` before answering, to keep a call in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the served content with fixed bytes.
    pub fn set_bytes(&self, bytes: impl Into<Vec<u8>>) {
        *self.source.lock().unwrap() = Source::Bytes(bytes.into());
    }

    /// Makes every following call fail.
    pub fn set_failure(&self, message: &str) {
        *self.source.lock().unwrap() = Source::Failure(message.to_string());
    }

    /// Number of times `fetch_raw_bytes` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_source(source: Source) -> Self {
        Self {
            source: Mutex::new(source),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> Result<Vec<u8>, ScrapeError> {
        match &*self.source.lock().unwrap() {
            Source::Fixture(path) => Ok(std::fs::read(path)?),
            Source::Bytes(bytes) => Ok(bytes.clone()),
            Source::Failure(message) => Err(ScrapeError::Io(std::io::Error::other(
                message.clone(),
            ))),
        }
    }
}

#[async_trait]
impl Scraper for MockScraper {
    async fn fetch_raw_bytes(&self) -> Result<Vec<u8>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.read()
    }

    fn duration(&self) -> Duration {
        Duration::ZERO
    }
}

/// Absolute path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}
