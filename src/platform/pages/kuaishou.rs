use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::comments::{CommentCollector, CommentSource, html_text, id_str, pick};
use super::{PageSite, dedup_ids};
use crate::crawler::CrawlerError;
use crate::fetch::FetchResponse;
use crate::platform::ids::{ParsedId, looks_like_url, sanitize_key};
use crate::platform::scaffold::{value_i64, value_str};
use crate::store::UnifiedComment;

const GRAPHQL_PATH: &str = "/graphql";
const COMMENT_PAGE_SIZE: u32 = 20;
/// Depth limit when searching the embedded page state.
const MAX_STATE_DEPTH: usize = 16;

const COMMENT_LIST_QUERY: &str = "query commentList($photoId: String, $pcursor: String, $count: Int) {
  shortVideoCommentList(photoId: $photoId, page: 1, pcursor: $pcursor, count: $count) {
    pcursor
    commentList {
      commentId authorId authorName content timestamp likedCount replyToCommentId
      subCommentCount subCommentsPcursor
      subComments { commentId authorId authorName content timestamp likedCount replyToCommentId }
    }
  }
}";

const SUB_COMMENT_QUERY: &str = "query subCommentList($photoId: String, $rootCommentId: String, $pcursor: String, $count: Int) {
  subCommentList(photoId: $photoId, rootCommentId: $rootCommentId, pcursor: $pcursor, count: $count) {
    pcursor
    subCommentsList { commentId authorId authorName content timestamp likedCount replyToCommentId }
  }
}";

#[allow(clippy::expect_used)]
static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"kuaishou\.com/(?:short-video|photo)/([A-Za-z0-9_-]+)").expect("video url regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static BARE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("bare id regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static LINKED_VIDEO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/short-video/([A-Za-z0-9_-]+)|"photoId":"([A-Za-z0-9_-]+)""#).expect("video link regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PROFILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/profile/([A-Za-z0-9_-]+)").expect("profile path regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static NEXT_DATA: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script#__NEXT_DATA__").expect("next data selector is valid") // Static pattern, safe to panic
});

/// Comment from a GraphQL or page-state item; `None` without text.
/// Millisecond timestamps are stored as seconds.
fn comment_item(item: &Value, root: &str) -> Option<UnifiedComment> {
    let content = html_text(&value_str(pick(item, &["content", "text"])));
    if content.is_empty() {
        return None;
    }
    let mut create_time = value_i64(pick(item, &["timestamp", "createTime"]));
    if create_time > 1_000_000_000_000 {
        create_time /= 1000;
    }
    let parent_comment_id = if root.is_empty() {
        id_str(&item["replyToCommentId"])
    } else {
        root.to_string()
    };
    Some(UnifiedComment {
        comment_id: id_str(pick(item, &["commentId", "id"])),
        parent_comment_id,
        content,
        create_time,
        like_count: value_i64(pick(item, &["likedCount", "likeCount"])),
        user_id: value_str(&item["authorId"]),
        user_nickname: value_str(&item["authorName"]),
        ..UnifiedComment::default()
    })
}

/// Cursor to request next, or `None` once the listing stops moving.
fn next_cursor(list: &Value, current: &str) -> Option<String> {
    let next = value_str(&list["pcursor"]);
    (!next.is_empty() && next != current && next != "no_more").then_some(next)
}

/// Later pages of one root comment's replies.
async fn collect_sub_comments(
    source: CommentSource<'_>,
    endpoint: &str,
    photo: &str,
    root: &str,
    start: String,
    comments: &mut CommentCollector,
) -> Result<(), CrawlerError> {
    let mut cursor = start;
    while !comments.is_full() {
        let body = json!({
            "operationName": "subCommentList",
            "query": SUB_COMMENT_QUERY,
            "variables": {"photoId": photo, "rootCommentId": root, "pcursor": cursor, "count": COMMENT_PAGE_SIZE},
        });
        let data: Value = source.fetch.post_json_value(source.cancel, endpoint, &body).await?;
        let list = &data["data"]["subCommentList"];
        let items = list["subCommentsList"].as_array().map_or(&[][..], Vec::as_slice);
        if items.is_empty() {
            break;
        }
        for item in items {
            if let Some(comment) = comment_item(item, root) {
                comments.push(comment);
            }
        }
        let Some(next) = next_cursor(list, &cursor) else {
            break;
        };
        cursor = next;
        source.between_pages().await?;
    }
    Ok(())
}

/// Root comments page by page, with inline and paged replies.
async fn collect_graphql(
    source: CommentSource<'_>,
    photo: &str,
    comments: &mut CommentCollector,
) -> Result<(), CrawlerError> {
    let endpoint = format!("{}{GRAPHQL_PATH}", source.base);
    let mut cursor = String::new();
    while !comments.is_full() {
        let body = json!({
            "operationName": "commentList",
            "query": COMMENT_LIST_QUERY,
            "variables": {"photoId": photo, "pcursor": cursor, "count": COMMENT_PAGE_SIZE},
        });
        let data: Value = source.fetch.post_json_value(source.cancel, &endpoint, &body).await?;
        let list = &data["data"]["shortVideoCommentList"];
        if list.is_null() {
            return Err(CrawlerError::api(Kuaishou::NAME, "graphql: no shortVideoCommentList"));
        }
        let roots = list["commentList"].as_array().map_or(&[][..], Vec::as_slice);
        if roots.is_empty() {
            break;
        }
        for root in roots {
            let Some(comment) = comment_item(root, "") else {
                continue;
            };
            let root_id = comment.comment_id.clone();
            if !comments.push(comment) || !comments.sub_comments() {
                continue;
            }
            let inline = root["subComments"].as_array().map_or(&[][..], Vec::as_slice);
            for sub in inline {
                if let Some(reply) = comment_item(sub, &root_id) {
                    comments.push(reply);
                }
            }
            let more = value_str(&root["subCommentsPcursor"]);
            let total = usize::try_from(value_i64(&root["subCommentCount"])).unwrap_or(0);
            if total > inline.len() && !more.is_empty() && more != "no_more" {
                match collect_sub_comments(source, &endpoint, photo, &root_id, more, comments).await {
                    Err(CrawlerError::Canceled) => return Err(CrawlerError::Canceled),
                    Err(err) => debug!(comment_id = %root_id, error = %err, "sub-comments skipped"),
                    Ok(()) => {}
                }
            }
        }
        let Some(next) = next_cursor(list, &cursor) else {
            break;
        };
        cursor = next;
        source.between_pages().await?;
    }
    Ok(())
}

/// Pushes every comment-list array found under `value`.
fn walk_comment_lists<'v>(value: &'v Value, depth: usize, out: &mut Vec<&'v Value>) {
    if depth > MAX_STATE_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child.as_array() {
                    Some(list) if key == "commentList" => out.extend(list),
                    _ => walk_comment_lists(child, depth + 1, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_comment_lists(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// Comments embedded in the page's `__NEXT_DATA__` state.
fn page_state_comments(html: &str, sub_comments: bool) -> Vec<UnifiedComment> {
    let doc = Html::parse_document(html);
    let Some(script) = doc.select(&NEXT_DATA).next() else {
        return Vec::new();
    };
    let raw: String = script.text().collect();
    let Ok(state) = serde_json::from_str::<Value>(raw.trim()) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    walk_comment_lists(&state, 0, &mut items);
    let mut out = Vec::new();
    for item in items {
        let Some(comment) = comment_item(item, "") else {
            continue;
        };
        if !sub_comments && !comment.parent_comment_id.is_empty() {
            continue;
        }
        let root = comment.comment_id.clone();
        out.push(comment);
        if sub_comments {
            for sub in item["subComments"].as_array().map_or(&[][..], Vec::as_slice) {
                out.extend(comment_item(sub, &root));
            }
        }
    }
    out
}

/// Kuaishou short videos.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kuaishou;

impl PageSite for Kuaishou {
    const NAME: &'static str = "kuaishou";
    const BASE_URL: &'static str = "https://www.kuaishou.com";

    fn parse_id(input: &str) -> Option<ParsedId> {
        let input = input.trim();
        if looks_like_url(input) {
            return VIDEO_URL
                .captures(input)
                .and_then(|caps| caps.get(1))
                .map(|m| ParsedId::new(m.as_str()));
        }
        BARE_ID.is_match(input).then(|| ParsedId::new(input))
    }

    fn detail_url(base: &str, id: &ParsedId) -> String {
        format!("{base}/short-video/{}", id.canonical)
    }

    fn search_url(base: &str, keyword: &str, _page: u32) -> String {
        // The web search page renders one result set; later pages come from
        // the same URL and stop yielding new ids.
        format!("{base}/search/video?searchKey={}", urlencoding::encode(keyword))
    }

    fn creator_url(base: &str, input: &str) -> Option<(String, String)> {
        let input = input.trim();
        if looks_like_url(input) {
            let id = PROFILE_PATH.captures(input)?.get(1)?.as_str();
            return Some((input.to_string(), sanitize_key(id)));
        }
        BARE_ID
            .is_match(input)
            .then(|| (format!("{base}/profile/{input}"), sanitize_key(input)))
    }

    fn extract_ids(html: &str) -> Vec<ParsedId> {
        dedup_ids(LINKED_VIDEO.captures_iter(html).filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| ParsedId::new(m.as_str()))
        }))
    }

    fn id_fields(id: &ParsedId) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("photo_id".into(), id.canonical.clone().into());
        fields
    }

    /// Pages through the GraphQL comment list, falling back to the page
    /// state when the API yields nothing.
    fn collect_comments<'a>(
        source: CommentSource<'a>,
        id: &'a ParsedId,
        page: &'a FetchResponse,
        comments: &'a mut CommentCollector,
    ) -> BoxFuture<'a, Result<(), CrawlerError>> {
        Box::pin(async move {
            match collect_graphql(source, &id.canonical, comments).await {
                Err(CrawlerError::Canceled) => return Err(CrawlerError::Canceled),
                Err(err) => debug!(photo_id = %id.canonical, error = %err, "comment api failed"),
                Ok(()) => {}
            }
            if comments.is_empty() {
                for comment in page_state_comments(&page.body, comments.sub_comments()) {
                    comments.push(comment);
                }
            }
            Ok(())
        })
    }
}
