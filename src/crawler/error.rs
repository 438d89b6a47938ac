//! Error taxonomy shared by the fetch path, runners and the dispatcher.
//!
//! Every failure a runner can observe is expressed as a [`CrawlerError`],
//! and every error (including foreign ones wrapped somewhere in a source
//! chain) can be reduced to one of the closed set of [`ErrorKind`]s with
//! [`kind_of`]. The kinds are what the dispatcher counts and what the
//! supervisor reports as `last_error_kind`.

use std::error::Error as StdError;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawler::risk::RiskHint;
use crate::proxy::ProxyError;
use crate::store::StoreError;

/// Maximum number of body bytes kept in an HTTP status error message.
pub const MAX_ERROR_BODY_BYTES: usize = 1024;

static HTTP_STATUS_TEXT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"http status=(\d{3})").ok());

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Anything not covered by a more specific kind.
    Unknown,
    /// The remote served an interstitial (captcha, forbidden page).
    RiskHint,
    /// Non-success HTTP status other than 401/403/429.
    Http,
    /// HTTP 401 or 403.
    Forbidden,
    /// HTTP 429.
    RateLimited,
    /// Input could not be parsed into a platform id.
    InvalidInput,
    /// The job's cancellation token fired.
    Canceled,
    /// A deadline or request timeout elapsed.
    Timeout,
}

impl ErrorKind {
    /// Stable snake_case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::RiskHint => "risk_hint",
            Self::Http => "http",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::InvalidInput => "invalid_input",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }

    /// Maps an HTTP status code onto its kind.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Forbidden,
            429 => Self::RateLimited,
            _ => Self::Http,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the crawl core.
#[derive(Debug, Error)]
pub enum CrawlerError {
    /// The job was cancelled.
    #[error("context canceled")]
    Canceled,

    /// A job-level deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A single request exceeded the client timeout.
    #[error("request timed out: {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("{platform}: http status={status} body={body} ({url})")]
    HttpStatus {
        /// Platform tag of the runner that issued the request.
        platform: String,
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, trimmed to [`MAX_ERROR_BODY_BYTES`].
        body: String,
    },

    /// The response body carried a risk marker.
    #[error("{platform}: risk hint detected: {hint} ({url})")]
    RiskHint {
        /// Platform tag.
        platform: String,
        /// URL of the page carrying the marker.
        url: String,
        /// Detected marker.
        hint: RiskHint,
    },

    /// An input could not be turned into a platform id.
    #[error("{platform}: invalid input {input:?}: {reason}")]
    InvalidInput {
        /// Platform tag.
        platform: String,
        /// The raw input.
        input: String,
        /// Why parsing failed.
        reason: String,
    },

    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("{platform}: network error fetching {url}: {source}")]
    Network {
        /// Platform tag.
        platform: String,
        /// Request URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// A response could not be decoded into the expected shape.
    #[error("{platform}: cannot decode response from {url}: {reason}")]
    Decode {
        /// Platform tag.
        platform: String,
        /// Request URL.
        url: String,
        /// Decoder message.
        reason: String,
    },

    /// The remote API answered with an application-level error code.
    #[error("{platform}: api error: {message}")]
    Api {
        /// Platform tag.
        platform: String,
        /// Error text reported by the API.
        message: String,
    },

    /// Proxy lease failure.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unrecoverable job setup problem (empty inputs, unsupported mode).
    #[error("{message}")]
    Setup {
        /// Description of the problem.
        message: String,
    },
}

impl CrawlerError {
    /// Builds an HTTP status error, trimming the body.
    pub fn http_status(
        platform: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: &str,
    ) -> Self {
        Self::HttpStatus {
            platform: platform.into(),
            url: url.into(),
            status,
            body: trim_body(body),
        }
    }

    /// Builds a risk hint error.
    pub fn risk_hint(platform: impl Into<String>, url: impl Into<String>, hint: RiskHint) -> Self {
        Self::RiskHint {
            platform: platform.into(),
            url: url.into(),
            hint,
        }
    }

    /// Builds an invalid input error.
    pub fn invalid_input(
        platform: impl Into<String>,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            platform: platform.into(),
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Builds a network error.
    pub fn network(platform: impl Into<String>, url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            platform: platform.into(),
            url: url.into(),
            source,
        }
    }

    /// Builds a decode error.
    pub fn decode(
        platform: impl Into<String>,
        url: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::Decode {
            platform: platform.into(),
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Builds an API error.
    pub fn api(platform: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            platform: platform.into(),
            message: message.into(),
        }
    }

    /// Builds a setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Returns the kind this error is counted under.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Canceled => ErrorKind::Canceled,
            Self::DeadlineExceeded | Self::Timeout { .. } => ErrorKind::Timeout,
            Self::HttpStatus { status, .. } => ErrorKind::from_status(*status),
            Self::RiskHint { .. } => ErrorKind::RiskHint,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Network { source, .. } if source.is_timeout() => ErrorKind::Timeout,
            Self::Proxy(ProxyError::Canceled) | Self::Store(StoreError::Canceled) => {
                ErrorKind::Canceled
            }
            Self::Network { .. }
            | Self::Decode { .. }
            | Self::Api { .. }
            | Self::Proxy(_)
            | Self::Store(_)
            | Self::Setup { .. } => ErrorKind::Unknown,
        }
    }

    /// Whether the fetch client may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Canceled | ErrorKind::InvalidInput | ErrorKind::RiskHint
        ) && !matches!(self, Self::DeadlineExceeded)
    }

    /// The URL associated with the error, when known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Timeout { url }
            | Self::HttpStatus { url, .. }
            | Self::RiskHint { url, .. }
            | Self::Network { url, .. }
            | Self::Decode { url, .. } => Some(url),
            _ => None,
        }
    }

    /// The HTTP status carried by the error, when any.
    #[must_use]
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The risk marker carried by the error, when any.
    #[must_use]
    pub fn risk(&self) -> Option<RiskHint> {
        match self {
            Self::RiskHint { hint, .. } => Some(*hint),
            _ => None,
        }
    }
}

/// Classifies any error into an [`ErrorKind`].
///
/// The source chain is inspected in priority order: a [`CrawlerError`]
/// anywhere in the chain decides by itself; then I/O and client timeouts;
/// then a textual `http status=NNN` match for errors that were flattened
/// into strings somewhere along the way.
#[must_use]
pub fn kind_of(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(crawler) = e.downcast_ref::<CrawlerError>() {
            return crawler.kind();
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::TimedOut
        {
            return ErrorKind::Timeout;
        }
        if let Some(req) = e.downcast_ref::<reqwest::Error>()
            && req.is_timeout()
        {
            return ErrorKind::Timeout;
        }
        current = e.source();
    }

    status_from_text(&render_chain(err)).unwrap_or(ErrorKind::Unknown)
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        text.push_str(": ");
        text.push_str(&e.to_string());
        current = e.source();
    }
    text
}

fn status_from_text(text: &str) -> Option<ErrorKind> {
    let re = HTTP_STATUS_TEXT.as_ref()?;
    let status: u16 = re.captures(text)?.get(1)?.as_str().parse().ok()?;
    (status >= 400).then(|| ErrorKind::from_status(status))
}

/// Whether a response status should be retried (429 and 5xx).
#[must_use]
pub fn should_retry_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Whether a response status means the current proxy lease is burned.
#[must_use]
pub fn should_invalidate_proxy_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429)
}

fn trim_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("wrapped: {inner}")]
    struct Wrapper {
        inner: String,
        #[source]
        source: Option<CrawlerError>,
    }

    // ==================== Kind Mapping Tests ====================

    #[test]
    fn test_http_status_kinds() {
        assert_eq!(
            CrawlerError::http_status("p", "u", 401, "").kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            CrawlerError::http_status("p", "u", 403, "").kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            CrawlerError::http_status("p", "u", 429, "").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            CrawlerError::http_status("p", "u", 500, "").kind(),
            ErrorKind::Http
        );
    }

    #[test]
    fn test_http_status_message_format() {
        let err = CrawlerError::http_status("bilibili", "/x/view", 503, "  busy \n");
        assert_eq!(
            err.to_string(),
            "bilibili: http status=503 body=busy (/x/view)"
        );
    }

    #[test]
    fn test_http_status_body_is_trimmed_to_cap() {
        let body = "验".repeat(1000);
        let err = CrawlerError::http_status("p", "u", 500, &body);
        let CrawlerError::HttpStatus { body, .. } = err else {
            panic!("expected http status");
        };
        assert!(body.len() <= MAX_ERROR_BODY_BYTES);
        assert!(body.chars().all(|c| c == '验'));
    }

    #[test]
    fn test_kind_of_canceled_and_deadline() {
        assert_eq!(kind_of(&CrawlerError::Canceled), ErrorKind::Canceled);
        assert_eq!(kind_of(&CrawlerError::DeadlineExceeded), ErrorKind::Timeout);
    }

    #[test]
    fn test_kind_of_walks_source_chain() {
        let err = Wrapper {
            inner: "outer".into(),
            source: Some(CrawlerError::Canceled),
        };
        assert_eq!(kind_of(&err), ErrorKind::Canceled);
    }

    #[test]
    fn test_kind_of_status_in_text() {
        let err = Wrapper {
            inner: "upstream said http status=429".into(),
            source: None,
        };
        assert_eq!(kind_of(&err), ErrorKind::RateLimited);

        let err = Wrapper {
            inner: "http status=403".into(),
            source: None,
        };
        assert_eq!(kind_of(&err), ErrorKind::Forbidden);

        let err = Wrapper {
            inner: "http status=500".into(),
            source: None,
        };
        assert_eq!(kind_of(&err), ErrorKind::Http);
    }

    #[test]
    fn test_kind_of_io_timeout() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(kind_of(&err), ErrorKind::Timeout);
    }

    #[test]
    fn test_kind_of_unknown() {
        let err = std::io::Error::other("boom");
        assert_eq!(kind_of(&err), ErrorKind::Unknown);
    }

    // ==================== Status Helper Tests ====================

    #[test]
    fn test_should_retry_status() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(500));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(403));
        assert!(!should_retry_status(404));
        assert!(!should_retry_status(200));
    }

    #[test]
    fn test_should_invalidate_proxy_status() {
        assert!(should_invalidate_proxy_status(401));
        assert!(should_invalidate_proxy_status(403));
        assert!(should_invalidate_proxy_status(429));
        assert!(!should_invalidate_proxy_status(500));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!(ErrorKind::RiskHint.to_string(), "risk_hint");
    }

    #[test]
    fn test_retryable_excludes_terminal_kinds() {
        assert!(!CrawlerError::Canceled.is_retryable());
        assert!(!CrawlerError::DeadlineExceeded.is_retryable());
        assert!(!CrawlerError::invalid_input("p", "x", "bad").is_retryable());
        assert!(CrawlerError::http_status("p", "u", 503, "").is_retryable());
    }
}
