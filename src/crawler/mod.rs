//! Crawl request/result model, error taxonomy and per-item dispatch.
//!
//! # Overview
//!
//! - [`Request`] describes one job: platform, [`Mode`], keywords or inputs,
//!   paging and concurrency limits.
//! - [`CrawlResult`] accumulates counts and a failure histogram keyed by
//!   [`ErrorKind`].
//! - [`for_each_limit`] applies a per-item function with a worker cap and
//!   cancellation.
//! - [`detect_risk_hint`] and [`kind_of`] classify bodies and errors.

mod dispatch;
mod error;
mod risk;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use dispatch::{DispatchStats, for_each_limit, for_each_limit_paced};
pub use error::{
    CrawlerError, ErrorKind, MAX_ERROR_BODY_BYTES, kind_of, should_invalidate_proxy_status,
    should_retry_status,
};
pub use risk::{RiskHint, detect_risk_hint};

/// Histogram of failures by kind.
pub type FailureKinds = BTreeMap<ErrorKind, usize>;

/// How a request's inputs are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Keywords drive paginated search.
    #[default]
    Search,
    /// Inputs are note URLs or ids.
    Detail,
    /// Inputs are creator URLs or ids.
    Creator,
}

impl Mode {
    /// Parses a mode label; blank or unknown labels fall back to search.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "detail" => Self::Detail,
            "creator" => Self::Creator,
            _ => Self::Search,
        }
    }

    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Detail => "detail",
            Self::Creator => "creator",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One crawl job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Canonical platform name.
    pub platform: String,
    /// Input interpretation.
    pub mode: Mode,
    /// Search keywords.
    pub keywords: Vec<String>,
    /// Note or creator inputs.
    pub inputs: Vec<String>,
    /// First search page (1-based).
    pub start_page: u32,
    /// Cap on distinct notes; 0 lets the runner pick its default.
    pub max_notes: usize,
    /// Worker count for per-item dispatch.
    pub concurrency: usize,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            platform: String::new(),
            mode: Mode::Search,
            keywords: Vec::new(),
            inputs: Vec::new(),
            start_page: 1,
            max_notes: 0,
            concurrency: 1,
        }
    }
}

/// Counts produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    pub platform: String,
    pub mode: Mode,
    pub started_at: i64,
    pub finished_at: i64,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failure_kinds: FailureKinds,
}

impl CrawlResult {
    /// Starts a result for the request, stamping `started_at`.
    #[must_use]
    pub fn start(request: &Request) -> Self {
        Self {
            platform: request.platform.clone(),
            mode: request.mode,
            started_at: unix_now(),
            ..Self::default()
        }
    }

    /// Adds dispatcher counts.
    pub fn absorb(&mut self, stats: &DispatchStats) {
        self.processed += stats.processed;
        self.succeeded += stats.succeeded;
        self.failed += stats.failed;
        merge_failure_kinds(&mut self.failure_kinds, &stats.failure_kinds);
    }

    /// Number of items that reached a terminal state.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Stamps `finished_at`.
    pub fn finish(&mut self) {
        self.finished_at = unix_now();
    }
}

/// A runner's return value: the counts gathered so far plus the job-level
/// error, if the job could not complete.
#[derive(Debug)]
pub struct RunOutcome {
    pub result: CrawlResult,
    pub error: Option<CrawlerError>,
}

impl RunOutcome {
    /// A completed job.
    #[must_use]
    pub fn completed(result: CrawlResult) -> Self {
        Self {
            result,
            error: None,
        }
    }

    /// A job that stopped with an error.
    #[must_use]
    pub fn failed(result: CrawlResult, error: CrawlerError) -> Self {
        Self {
            result,
            error: Some(error),
        }
    }
}

/// Adds `src` counts into `dst`. Entries are summed per kind.
pub fn merge_failure_kinds(dst: &mut FailureKinds, src: &FailureKinds) {
    for (kind, count) in src {
        *dst.entry(*kind).or_insert(0) += count;
    }
}

/// Sleeps for `duration` unless the token fires first.
///
/// Returns `true` when the full duration elapsed and `false` on cancellation.
pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
