//! HTTP fetch path shared by all runners.
//!
//! [`FetchClient`] issues GETs with a per-request timeout, exponential
//! backoff ([`RetryPolicy`]), optional proxy rotation and a body cap. Every
//! failure is a [`CrawlerError`](crate::crawler::CrawlerError) carrying its
//! classified kind.

mod client;
mod retry;

pub use client::{
    BROWSER_USER_AGENT, DEFAULT_BODY_CAP, DEFAULT_TIMEOUT, FetchClient, FetchConfig, FetchResponse,
};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_RETRY_COUNT, RetryDecision, RetryPolicy,
};
