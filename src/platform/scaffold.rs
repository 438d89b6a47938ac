//! Plumbing shared by the site runners: input resolution, limits, paging,
//! risk checks, comment persistence and result finalization.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::crawler::{
    CrawlResult, CrawlerError, Request, RunOutcome, for_each_limit_paced, sleep,
};
use crate::download::{DownloadSummary, MediaDownloader};
use crate::fetch::{BROWSER_USER_AGENT, FetchResponse};
use crate::store::{Store, UnifiedComment};

/// Effective paging and concurrency for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub start_page: u32,
    /// Cap on items attempted by the whole job, across every keyword and
    /// creator.
    pub max_notes: usize,
    pub concurrency: usize,
}

impl Limits {
    /// Items the job may still attempt.
    #[must_use]
    pub fn remaining(&self, result: &CrawlResult) -> usize {
        self.max_notes.saturating_sub(result.attempted())
    }
}

/// One page of candidates from a search or listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// No further pages exist.
    pub last: bool,
}

impl<T> Page<T> {
    #[must_use]
    pub fn more(items: Vec<T>) -> Self {
        Self { items, last: false }
    }

    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self { items, last: true }
    }
}

/// Trimmed, non-blank inputs of a detail or creator request.
///
/// # Errors
///
/// A setup error when nothing remains.
pub fn resolve_inputs(platform: &str, request: &Request) -> Result<Vec<String>, CrawlerError> {
    let inputs = trimmed(&request.inputs);
    if inputs.is_empty() {
        return Err(CrawlerError::setup(format!(
            "{platform}: empty inputs for {} mode",
            request.mode
        )));
    }
    Ok(inputs)
}

/// Trimmed, non-blank keywords of a search request.
///
/// # Errors
///
/// A setup error when nothing remains.
pub fn resolve_keywords(platform: &str, request: &Request) -> Result<Vec<String>, CrawlerError> {
    let keywords = trimmed(&request.keywords);
    if keywords.is_empty() {
        return Err(CrawlerError::setup(format!("{platform}: empty keywords")));
    }
    Ok(keywords)
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start page at least 1, `max_notes` 0 replaced by the runner default,
/// concurrency at least 1.
#[must_use]
pub fn effective_limits(request: &Request, default_max_notes: usize) -> Limits {
    Limits {
        start_page: request.start_page.max(1),
        max_notes: if request.max_notes == 0 {
            default_max_notes
        } else {
            request.max_notes
        },
        concurrency: request.concurrency.max(1),
    }
}

/// Keeps items whose key is non-blank and unseen, recording them in `seen`,
/// up to `remaining` items (0 = no cap).
pub fn filter_new_ids<T>(
    items: Vec<T>,
    seen: &mut HashSet<String>,
    remaining: usize,
    key_of: impl Fn(&T) -> String,
) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if remaining > 0 && out.len() >= remaining {
            break;
        }
        let key = key_of(&item).trim().to_string();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(item);
    }
    out
}

/// Starts the result for a request, forcing the runner's platform tag.
#[must_use]
pub fn new_result(platform: &str, request: &Request) -> CrawlResult {
    let mut result = CrawlResult::start(request);
    result.platform = platform.to_string();
    result
}

/// Stamps `finished_at` and folds a fired token into the error slot.
#[must_use]
pub fn finish(
    cancel: &CancellationToken,
    mut result: CrawlResult,
    error: Option<CrawlerError>,
) -> RunOutcome {
    result.finish();
    match error {
        Some(err) => RunOutcome::failed(result, err),
        None if cancel.is_cancelled() => RunOutcome::failed(result, CrawlerError::Canceled),
        None => RunOutcome::completed(result),
    }
}

/// Fails with a risk hint error when the response body carries a marker.
///
/// # Errors
///
/// [`CrawlerError::RiskHint`].
pub fn record_risk(platform: &str, response: &FetchResponse) -> Result<(), CrawlerError> {
    match response.risk_hint() {
        Some(hint) => {
            warn!(platform, url = %response.url, hint = %hint.as_str(), "risk hint detected");
            Err(CrawlerError::risk_hint(platform, &response.url, hint))
        }
        None => Ok(()),
    }
}

/// Pause between successive items of one worker.
#[must_use]
pub fn item_pause(config: &Config) -> Duration {
    config.item_pause()
}

/// Persists comments through the store, logging instead of failing.
///
/// A note whose comments cannot be written still counts as crawled.
pub async fn save_comments(
    store: &Store,
    cancel: &CancellationToken,
    note_key: &str,
    comments: &[UnifiedComment],
) -> usize {
    if comments.is_empty() {
        return 0;
    }
    match store.save_comments(cancel, note_key, comments).await {
        Ok(written) => {
            debug!(note_id = %note_key, written, "comments saved");
            written
        }
        Err(err) => {
            warn!(note_id = %note_key, error = %err, "save comments failed");
            0
        }
    }
}

/// Downloads media into the note's `media/` directory, logging failures.
pub async fn download_media(
    store: &Store,
    config: &Config,
    cancel: &CancellationToken,
    note_key: &str,
    media: &[(String, String)],
    headers: &BTreeMap<String, String>,
) -> Option<DownloadSummary> {
    if media.is_empty() {
        return None;
    }
    let dir = match store.note_media_dir(note_key) {
        Ok(dir) => dir,
        Err(err) => {
            warn!(note_id = %note_key, error = %err, "media dir unavailable");
            return None;
        }
    };
    let downloader = match MediaDownloader::with_config(dir, &config.downloader_config()) {
        Ok(downloader) => downloader,
        Err(err) => {
            warn!(note_id = %note_key, error = %err, "media downloader init failed");
            return None;
        }
    };
    let (urls, filenames): (Vec<String>, Vec<String>) = media.iter().cloned().unzip();
    match downloader.batch_download(cancel, &urls, &filenames, headers).await {
        Ok(summary) => {
            if summary.failed() > 0 {
                warn!(note_id = %note_key, failed = summary.failed(), "some media downloads failed");
            }
            Some(summary)
        }
        Err(err) => {
            warn!(note_id = %note_key, error = %err, "media download failed");
            None
        }
    }
}

/// Browser-like headers for media hosts that check Referer.
#[must_use]
pub fn media_headers(referer: &str, cookie: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("User-Agent".to_string(), BROWSER_USER_AGENT.to_string());
    headers.insert("Referer".to_string(), referer.to_string());
    if !cookie.trim().is_empty() {
        headers.insert("Cookie".to_string(), cookie.trim().to_string());
    }
    headers
}

/// Pages through a listing until the job has attempted `max_notes` items, a
/// page yields nothing new, or the listing reports its last page.
///
/// Each page's fresh items are dispatched with `handle` under the job's
/// concurrency and pause; the dispatch counts land in `result`.
///
/// # Errors
///
/// The first page fetch error, or [`CrawlerError::Canceled`] when the pause
/// between pages is interrupted.
#[allow(clippy::too_many_arguments)]
pub async fn paginate<T, P, PFut, F, Fut>(
    cancel: &CancellationToken,
    result: &mut CrawlResult,
    limits: Limits,
    pause: Duration,
    seen: &mut HashSet<String>,
    key_of: impl Fn(&T) -> String,
    mut fetch_page: P,
    handle: F,
) -> Result<(), CrawlerError>
where
    P: FnMut(u32) -> PFut,
    PFut: Future<Output = Result<Page<T>, CrawlerError>>,
    F: Fn(CancellationToken, T) -> Fut,
    Fut: Future<Output = Result<(), CrawlerError>>,
{
    let mut page = limits.start_page;
    while limits.remaining(result) > 0 {
        if cancel.is_cancelled() {
            return Err(CrawlerError::Canceled);
        }
        let batch = fetch_page(page).await?;
        let remaining = limits.remaining(result);
        let fresh = filter_new_ids(batch.items, seen, remaining, &key_of);
        if fresh.is_empty() {
            debug!(page, "no new items, stop paging");
            break;
        }
        let stats = for_each_limit_paced(cancel, fresh, limits.concurrency, pause, &handle).await;
        result.absorb(&stats);
        if batch.last {
            break;
        }
        page += 1;
        if !sleep(cancel, pause).await {
            return Err(CrawlerError::Canceled);
        }
    }
    Ok(())
}

/// Joins `base` and `path` and appends the encoded query pairs.
///
/// # Errors
///
/// A setup error when the joined URL does not parse.
pub fn endpoint(
    platform: &str,
    base: &str,
    path: &str,
    params: &[(&str, String)],
) -> Result<String, CrawlerError> {
    let raw = format!("{}{path}", base.trim_end_matches('/'));
    let parsed = if params.is_empty() {
        Url::parse(&raw)
    } else {
        Url::parse_with_params(&raw, params)
    };
    parsed
        .map(String::from)
        .map_err(|e| CrawlerError::setup(format!("{platform}: invalid endpoint {raw:?}: {e}")))
}

/// String form of a JSON scalar; blank for null, arrays and objects.
#[must_use]
pub fn value_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Integer form of a JSON number or numeric string; 0 otherwise.
#[must_use]
pub fn value_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Absolute `https:` form of protocol-relative URLs; `None` unless the
/// result is an http(s) URL.
#[must_use]
pub fn http_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let url = if raw.starts_with("//") {
        format!("https:{raw}")
    } else {
        raw.to_string()
    };
    (url.starts_with("http://") || url.starts_with("https://")).then_some(url)
}
