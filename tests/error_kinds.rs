//! Integration tests for error classification.

use std::io;

use media_crawler_core::crawler::{CrawlerError, ErrorKind, RiskHint, kind_of};
use media_crawler_core::proxy::ProxyError;
use media_crawler_core::store::StoreError;

/// Wraps another error the way callers add context.
#[derive(Debug, thiserror::Error)]
#[error("while crawling: {source}")]
struct Wrapped {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

fn wrap(err: impl std::error::Error + Send + Sync + 'static) -> Wrapped {
    Wrapped {
        source: Box::new(err),
    }
}

// ==================== Cancellation / Deadline Tests ====================

#[test]
fn test_canceled_and_deadline_classify_through_wrapping() {
    assert_eq!(kind_of(&CrawlerError::Canceled), ErrorKind::Canceled);
    assert_eq!(kind_of(&wrap(CrawlerError::Canceled)), ErrorKind::Canceled);
    assert_eq!(kind_of(&wrap(wrap(CrawlerError::Canceled))), ErrorKind::Canceled);

    assert_eq!(kind_of(&CrawlerError::DeadlineExceeded), ErrorKind::Timeout);
    assert_eq!(kind_of(&wrap(CrawlerError::DeadlineExceeded)), ErrorKind::Timeout);
}

#[test]
fn test_store_and_proxy_cancellation_is_canceled() {
    assert_eq!(CrawlerError::from(StoreError::Canceled).kind(), ErrorKind::Canceled);
    assert_eq!(CrawlerError::from(ProxyError::Canceled).kind(), ErrorKind::Canceled);
}

#[test]
fn test_other_errors_never_classify_as_canceled() {
    let errors = [
        CrawlerError::http_status("bilibili", "https://x", 500, "oops"),
        CrawlerError::risk_hint("weibo", "https://y", RiskHint::Forbidden),
        CrawlerError::invalid_input("tieba", "???", "not a thread id"),
        CrawlerError::api("bilibili", "code=-400"),
        CrawlerError::setup("empty inputs"),
    ];
    for err in &errors {
        let kind = kind_of(err);
        assert_ne!(kind, ErrorKind::Canceled, "{err}");
        assert_ne!(kind, ErrorKind::Timeout, "{err}");
    }
    assert_eq!(kind_of(&io::Error::other("plain")), ErrorKind::Unknown);
}

// ==================== Status Mapping Tests ====================

#[test]
fn test_http_status_kinds() {
    let kind = |status| CrawlerError::http_status("p", "https://x", status, "").kind();
    assert_eq!(kind(401), ErrorKind::Forbidden);
    assert_eq!(kind(403), ErrorKind::Forbidden);
    assert_eq!(kind(429), ErrorKind::RateLimited);
    assert_eq!(kind(404), ErrorKind::Http);
    assert_eq!(kind(503), ErrorKind::Http);
}

#[test]
fn test_io_timeout_and_flattened_status_text() {
    let timeout = io::Error::new(io::ErrorKind::TimedOut, "read timed out");
    assert_eq!(kind_of(&wrap(timeout)), ErrorKind::Timeout);

    let flattened = io::Error::other("upstream said http status=429 body=slow down");
    assert_eq!(kind_of(&flattened), ErrorKind::RateLimited);
    let flattened = io::Error::other("http status=200 but empty");
    assert_eq!(kind_of(&flattened), ErrorKind::Unknown);
}

#[test]
fn test_kind_labels_serialize_snake_case() {
    assert_eq!(serde_json::to_value(ErrorKind::RateLimited).unwrap(), "rate_limited");
    assert_eq!(serde_json::to_value(ErrorKind::RiskHint).unwrap(), "risk_hint");
    assert_eq!(ErrorKind::InvalidInput.to_string(), "invalid_input");
}
