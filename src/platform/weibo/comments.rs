//! Hot-flow comment paging and projection.

use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Api, PLATFORM};
use crate::crawler::CrawlerError;
use crate::platform::scaffold::{value_i64, value_str};
use crate::store::UnifiedComment;

/// `Sat Mar 02 10:04:05 +0800 2024`
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[allow(clippy::expect_used)]
static TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[^>]*>").expect("html tag regex is valid") // Static pattern, safe to panic
});

/// Text content of an HTML fragment.
pub(super) fn strip_html(text: &str) -> String {
    TAGS.replace_all(text, "").trim().to_string()
}

/// Unix seconds of a `created_at` value; 0 when it does not parse.
pub(super) fn parse_created_at(value: &str) -> i64 {
    DateTime::parse_from_str(value.trim(), CREATED_AT_FORMAT).map_or(0, |t| t.timestamp())
}

pub(super) fn project(note_key: &str, comment: &Value, parent: &str) -> UnifiedComment {
    UnifiedComment {
        platform: PLATFORM.to_string(),
        note_id: note_key.to_string(),
        comment_id: value_str(&comment["id"]),
        parent_comment_id: parent.to_string(),
        content: strip_html(&value_str(&comment["text"])),
        create_time: parse_created_at(&value_str(&comment["created_at"])),
        like_count: value_i64(&comment["like_count"]),
        user_id: value_str(&comment["user"]["id"]),
        user_nickname: value_str(&comment["user"]["screen_name"]),
        ..UnifiedComment::default()
    }
}

/// Projects one page of comments, including inline replies when
/// `sub_comments` is set, stopping at `max` total (0 = no cap).
pub(super) fn project_page(
    note_key: &str,
    page: &[Value],
    sub_comments: bool,
    max: usize,
    out: &mut Vec<UnifiedComment>,
) -> bool {
    let full = |n: usize| max > 0 && n >= max;
    for comment in page {
        if full(out.len()) {
            return false;
        }
        let top = project(note_key, comment, "");
        let parent = top.comment_id.clone();
        out.push(top);
        if !sub_comments {
            continue;
        }
        for reply in comment["comments"].as_array().into_iter().flatten() {
            if full(out.len()) {
                return false;
            }
            out.push(project(note_key, reply, &parent));
        }
    }
    true
}

/// Comments of a status, following `max_id` until it reaches 0.
pub(super) async fn fetch_comments(
    api: &Api,
    cancel: &CancellationToken,
    status_id: &str,
    note_key: &str,
    sub_comments: bool,
    max: usize,
) -> Result<Vec<UnifiedComment>, CrawlerError> {
    let mut out = Vec::new();
    let mut max_id: i64 = 0;
    let mut max_id_type: i64 = 0;
    loop {
        let mut params = vec![
            ("id", status_id.to_string()),
            ("mid", status_id.to_string()),
            ("max_id_type", max_id_type.to_string()),
        ];
        if max_id > 0 {
            params.push(("max_id", max_id.to_string()));
        }
        let data = api.call(cancel, "/comments/hotflow", &params).await?;
        let page = data["data"].as_array().map_or(&[][..], Vec::as_slice);
        if page.is_empty() || !project_page(note_key, page, sub_comments, max, &mut out) {
            break;
        }
        max_id = value_i64(&data["max_id"]);
        max_id_type = value_i64(&data["max_id_type"]);
        if max_id == 0 {
            break;
        }
    }
    debug!(note_id = %note_key, count = out.len(), "comments fetched");
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("hi <a href='/n/x'>@x</a> <span class=\"url-icon\"></span>"), "hi @x");
    }

    #[test]
    fn test_parse_created_at() {
        assert_eq!(parse_created_at("Thu Nov 16 06:13:20 +0800 2023"), 1_700_086_400);
        assert_eq!(parse_created_at("yesterday"), 0);
    }

    #[test]
    fn test_project_page_with_replies_and_cap() {
        let page = vec![
            json!({
                "id": "1", "text": "<b>top</b>", "like_count": 3,
                "user": {"id": 11, "screen_name": "a"},
                "comments": [{"id": "2", "text": "reply", "user": {"id": 12}}]
            }),
            json!({"id": "3", "text": "second"}),
        ];
        let mut out = Vec::new();
        assert!(project_page("S1", &page, true, 0, &mut out));
        let ids: Vec<_> = out.iter().map(|c| (c.comment_id.as_str(), c.parent_comment_id.as_str())).collect();
        assert_eq!(ids, vec![("1", ""), ("2", "1"), ("3", "")]);
        assert_eq!(out[0].content, "top");
        assert_eq!(out[0].user_nickname, "a");

        let mut capped = Vec::new();
        assert!(!project_page("S1", &page, false, 1, &mut capped));
        assert_eq!(capped.len(), 1);
    }
}
