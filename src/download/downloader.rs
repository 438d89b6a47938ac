//! Concurrent media downloader.
//!
//! Each file is streamed to `<name>.part` and renamed into place once the body
//! is complete, so a crash never leaves a truncated file under the final name.
//! Existing files are skipped. Transient failures are retried with the shared
//! [`RetryPolicy`] plus up to 250 ms of jitter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::filename::{is_suspicious_content_type, sanitize_filename};
use crate::crawler::sleep;
use crate::fetch::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_RETRY_COUNT, RetryDecision, RetryPolicy};

/// Default per-request timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of files in flight.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Upper bound on files in flight.
pub const MAX_DOWNLOAD_CONCURRENCY: usize = 8;

/// Jitter added to every download backoff.
pub const DOWNLOAD_JITTER: Duration = Duration::from_millis(250);

/// Downloader tuning.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub timeout: Duration,
    pub concurrency: usize,
    pub retry_count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            retry_count: DEFAULT_RETRY_COUNT,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
}

/// One failed file of a batch.
#[derive(Debug)]
pub struct DownloadFailure {
    pub url: String,
    pub filename: String,
    pub error: DownloadError,
}

/// Batch totals.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<DownloadFailure>,
}

impl DownloadSummary {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Media downloader writing into one directory.
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: Client,
    dir: PathBuf,
    concurrency: usize,
    policy: RetryPolicy,
}

impl MediaDownloader {
    /// Creates a downloader with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        Self::with_config(dir, &DownloaderConfig::default())
    }

    /// Creates a downloader; concurrency is clamped to `1..=8`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the HTTP client cannot be built.
    pub fn with_config(
        dir: impl Into<PathBuf>,
        config: &DownloaderConfig,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .gzip(true)
            .build()
            .map_err(|source| DownloadError::Client { source })?;
        Ok(Self {
            client,
            dir: dir.into(),
            concurrency: config.concurrency.clamp(1, MAX_DOWNLOAD_CONCURRENCY),
            policy: RetryPolicy::new(config.retry_count, config.base_delay, config.max_delay)
                .with_jitter(DOWNLOAD_JITTER),
        })
    }

    /// Overrides the backoff (tests use millisecond delays).
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Downloads one file, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`] once retries are exhausted, or
    /// immediately for non-retryable failures and cancellation.
    #[instrument(skip(self, cancel, headers), fields(url = %url))]
    pub async fn download(
        &self,
        cancel: &CancellationToken,
        url: &str,
        filename: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidUrl {
                url: url.to_string(),
            });
        }
        let filename = sanitize_filename(filename);
        if filename.is_empty() {
            return Err(DownloadError::EmptyFilename);
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DownloadError::io(&self.dir, e))?;

        let path = self.dir.join(&filename);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "file exists, skipping");
            return Ok(DownloadOutcome::Skipped { path });
        }

        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Canceled);
            }
            let err = match self.attempt(cancel, url, &filename, &path, headers).await {
                Ok(bytes) => {
                    debug!(path = %path.display(), bytes, attempt, "download completed");
                    return Ok(DownloadOutcome::Downloaded { path, bytes });
                }
                Err(err) => err,
            };
            match self.policy.should_retry(err.is_retryable(), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(error = %err, attempt, delay_ms = delay.as_millis(), "download attempt failed");
                    if !sleep(cancel, delay).await {
                        return Err(DownloadError::Canceled);
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "giving up");
                    return Err(err);
                }
            }
        }
    }

    /// Downloads `urls[i]` to `filenames[i]` with bounded concurrency.
    /// Individual failures are collected, not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::LengthMismatch`] when the slices differ in
    /// length.
    #[instrument(skip_all, fields(count = urls.len(), dir = %self.dir.display()))]
    pub async fn batch_download(
        &self,
        cancel: &CancellationToken,
        urls: &[String],
        filenames: &[String],
        headers: &BTreeMap<String, String>,
    ) -> Result<DownloadSummary, DownloadError> {
        if urls.len() != filenames.len() {
            return Err(DownloadError::LengthMismatch {
                urls: urls.len(),
                filenames: filenames.len(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let headers = Arc::new(headers.clone());
        let mut handles = Vec::with_capacity(urls.len());
        for (url, filename) in urls.iter().zip(filenames) {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let cancel = cancel.clone();
            let headers = Arc::clone(&headers);
            let (url, filename) = (url.clone(), filename.clone());
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = this.download(&cancel, &url, &filename, &headers).await;
                (url, filename, result)
            }));
        }

        let mut summary = DownloadSummary::default();
        for handle in handles {
            let Ok((url, filename, result)) = handle.await else {
                continue;
            };
            match result {
                Ok(DownloadOutcome::Downloaded { .. }) => summary.downloaded += 1,
                Ok(DownloadOutcome::Skipped { .. }) => summary.skipped += 1,
                Err(error) => {
                    warn!(url = %url, error = %error, "download failed");
                    summary.failures.push(DownloadFailure {
                        url,
                        filename,
                        error,
                    });
                }
            }
        }
        info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed(),
            "media batch finished"
        );
        Ok(summary)
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        url: &str,
        filename: &str,
        path: &Path,
        headers: &BTreeMap<String, String>,
    ) -> Result<u64, DownloadError> {
        let mut request = self.client.get(url).header(ACCEPT, "*/*");
        for (name, value) in headers {
            if !name.is_empty() && !value.is_empty() {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Canceled),
            sent = request.send() => sent.map_err(|e| DownloadError::network(url, e))?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if is_suspicious_content_type(&content_type, filename) {
            return Err(DownloadError::SuspiciousContentType {
                filename: filename.to_string(),
                content_type,
            });
        }

        let part = path.with_file_name(format!("{filename}.part"));
        let result = stream_to(cancel, url, response, &part).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, path)
                    .await
                    .map_err(|e| DownloadError::io(path, e))?;
                Ok(bytes)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(err)
            }
        }
    }
}

async fn stream_to(
    cancel: &CancellationToken,
    url: &str,
    response: reqwest::Response,
    part: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(part)
        .await
        .map_err(|e| DownloadError::io(part, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes = 0u64;
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Canceled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(part, e))?;
        bytes += chunk.len() as u64;
    }
    writer.flush().await.map_err(|e| DownloadError::io(part, e))?;
    Ok(bytes)
}
