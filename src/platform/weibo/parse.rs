//! Status and user id extraction.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::PLATFORM;
use crate::crawler::CrawlerError;
use crate::platform::ids::{ParsedId, invalid_id};

#[allow(clippy::expect_used)]
static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\b([0-9A-Za-z]{6,})\b$").expect("status id regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static UID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{5,})\b").expect("uid regex is valid") // Static pattern, safe to panic
});

fn status_token(text: &str) -> Option<String> {
    STATUS
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolves a status URL (`/detail/<id>`, `/status/<id>`, `/<uid>/<mblogid>`,
/// `?id=`) or a bare numeric or base62 id.
///
/// # Errors
///
/// [`CrawlerError::InvalidInput`] when no id is found.
pub fn parse_status_id(input: &str) -> Result<ParsedId, CrawlerError> {
    let trimmed = input.trim();
    let found = match Url::parse(trimmed) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .and_then(|(_, value)| status_token(&value))
            .or_else(|| {
                url.path_segments()
                    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                    .and_then(status_token)
            }),
        Err(_) => status_token(trimmed),
    };
    found
        .map(ParsedId::new)
        .ok_or_else(|| invalid_id(PLATFORM, input, "status id"))
}

/// Resolves a user id from a profile URL (`/u/<uid>`, `/profile/<uid>`,
/// `/<uid>`) or bare digits.
///
/// # Errors
///
/// [`CrawlerError::InvalidInput`] when no id is found.
pub(super) fn parse_creator_uid(input: &str) -> Result<ParsedId, CrawlerError> {
    let trimmed = input.trim();
    let haystack = Url::parse(trimmed).map_or_else(|_| trimmed.to_string(), |url| url.path().to_string());
    UID.captures(&haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| ParsedId::new(m.as_str()))
        .ok_or_else(|| invalid_id(PLATFORM, input, "user id"))
}
