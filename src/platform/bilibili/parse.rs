//! Video and creator id extraction from user input.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::PLATFORM;
use crate::crawler::CrawlerError;
use crate::platform::ids::{ParsedId, invalid_id};

#[allow(clippy::expect_used)]
static BVID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bBV[0-9A-Za-z]{10}\b").expect("bvid regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static AVID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bav(\d+)\b").expect("avid regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static MID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4,})\b").expect("mid regex is valid") // Static pattern, safe to panic
});

/// A resolved video: either a BV id or a numeric aid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum VideoId {
    Bvid(String),
    Aid(u64),
}

impl VideoId {
    pub(super) fn query(&self) -> (&'static str, String) {
        match self {
            Self::Bvid(bvid) => ("bvid", bvid.clone()),
            Self::Aid(aid) => ("aid", aid.to_string()),
        }
    }

    pub(super) fn parsed(&self) -> ParsedId {
        match self {
            Self::Bvid(bvid) => ParsedId::new(bvid.clone()),
            Self::Aid(aid) => ParsedId::new(format!("av{aid}")),
        }
    }
}

fn bvid_in(text: &str) -> Option<VideoId> {
    let m = BVID.find(text)?;
    // The "BV" prefix is case-insensitive on input but the id body is not.
    Some(VideoId::Bvid(format!("BV{}", &m.as_str()[2..])))
}

fn avid_in(text: &str) -> Option<VideoId> {
    AVID.captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
        .map(VideoId::Aid)
}

pub(super) fn video_id(input: &str) -> Option<VideoId> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(input) {
        if let Some(id) = bvid_in(url.path()).or_else(|| avid_in(url.path())) {
            return Some(id);
        }
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "bvid" => {
                    if let Some(id) = bvid_in(&value) {
                        return Some(id);
                    }
                }
                "aid" | "avid" => {
                    if let Ok(aid) = value.trim().parse() {
                        return Some(VideoId::Aid(aid));
                    }
                }
                _ => {}
            }
        }
    }
    if let Some(id) = bvid_in(input).or_else(|| avid_in(input)) {
        return Some(id);
    }
    input.parse().ok().map(VideoId::Aid)
}

/// Resolves a video URL, BV id, `av` id or bare aid.
///
/// The note key is the BV id, or `av<aid>` for numeric ids.
///
/// # Errors
///
/// [`CrawlerError::InvalidInput`] when no id is found.
pub fn parse_video_id(input: &str) -> Result<ParsedId, CrawlerError> {
    video_id(input)
        .map(|id| id.parsed())
        .ok_or_else(|| invalid_id(PLATFORM, input, "video id"))
}

/// Resolves a creator's numeric mid from a space URL or bare id.
///
/// # Errors
///
/// [`CrawlerError::InvalidInput`] when no mid is found.
pub fn parse_creator_mid(input: &str) -> Result<ParsedId, CrawlerError> {
    let trimmed = input.trim();
    let haystack = Url::parse(trimmed).map_or_else(|_| trimmed.to_string(), |url| url.path().to_string());
    MID.captures(&haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| ParsedId::new(m.as_str()))
        .ok_or_else(|| invalid_id(PLATFORM, input, "creator mid"))
}
