use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

use super::comments::{CommentCollector, CommentSource, html_text};
use super::{PageSite, dedup_ids};
use crate::crawler::CrawlerError;
use crate::fetch::FetchResponse;
use crate::platform::ids::{ParsedId, looks_like_url, sanitize_key};
use crate::platform::scaffold::{value_i64, value_str};
use crate::store::UnifiedComment;

#[allow(clippy::expect_used)]
static THREAD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/p/(\d+)").expect("thread path regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static KZ_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&]kz=(\d+)").expect("kz regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static LINKED_THREAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-tid="(\d+)"|href="[^"]*/p/(\d+)"#).expect("thread link regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static DATA_FIELD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("[data-field]").expect("data-field selector is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static FLOOR_CONTENT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".lzl_content_main").expect("floor content selector is valid") // Static pattern, safe to panic
});

/// A floor of a thread page.
#[derive(Debug)]
struct Floor {
    comment: UnifiedComment,
    forum_id: String,
    replies: i64,
}

/// Floors of a thread page, from the JSON in their `data-field` attributes.
/// Floors without text are skipped.
fn thread_floors(html: &str) -> Vec<Floor> {
    let doc = Html::parse_document(html);
    doc.select(&DATA_FIELD)
        .filter_map(|el| {
            let field: Value = serde_json::from_str(el.value().attr("data-field")?).ok()?;
            let content = &field["content"];
            let post_id = value_str(&content["post_id"]);
            let text = html_text(&value_str(&content["content"]));
            if post_id.is_empty() || text.is_empty() {
                return None;
            }
            Some(Floor {
                comment: UnifiedComment {
                    comment_id: post_id,
                    content: text,
                    user_id: value_str(&field["author"]["user_id"]),
                    user_nickname: value_str(&field["author"]["user_name"]),
                    ..UnifiedComment::default()
                },
                forum_id: value_str(&content["forum_id"]),
                replies: value_i64(&content["comment_num"]),
            })
        })
        .collect()
}

/// Replies inside a floor, from one page of the floor reply endpoint.
fn floor_replies(html: &str, floor: &str) -> Vec<UnifiedComment> {
    let doc = Html::parse_document(html);
    doc.select(&DATA_FIELD)
        .filter_map(|el| {
            let field: Value = serde_json::from_str(el.value().attr("data-field")?).ok()?;
            let spid = value_str(&field["spid"]);
            if spid.is_empty() {
                return None;
            }
            let content = el
                .select(&FLOOR_CONTENT)
                .next()
                .map(|c| c.text().collect::<String>().trim().to_string())
                .unwrap_or_default();
            Some(UnifiedComment {
                comment_id: spid,
                parent_comment_id: floor.to_string(),
                content,
                user_nickname: value_str(&field["showname"]),
                ..UnifiedComment::default()
            })
        })
        .collect()
}

fn thread_page_url(base: &str, thread: &str, page: u32) -> String {
    format!("{base}/p/{thread}?pn={page}")
}

fn floor_page_url(base: &str, thread: &str, floor: &str, forum: &str, page: u32) -> String {
    format!(
        "{base}/p/comment?tid={}&pid={}&fid={}&pn={page}",
        urlencoding::encode(thread),
        urlencoding::encode(floor),
        urlencoding::encode(forum)
    )
}

/// Pages through the replies of one floor until a page adds nothing.
async fn collect_floor_replies(
    source: CommentSource<'_>,
    thread: &str,
    floor: &Floor,
    comments: &mut CommentCollector,
) -> Result<(), CrawlerError> {
    let floor_id = floor.comment.comment_id.as_str();
    let mut page = 1;
    while !comments.is_full() {
        let url = floor_page_url(source.base, thread, floor_id, &floor.forum_id, page);
        let response = source.fetch.get_html(source.cancel, &url).await?;
        let mut added = 0;
        for reply in floor_replies(&response.body, floor_id) {
            if comments.push(reply) {
                added += 1;
            }
        }
        if added == 0 {
            break;
        }
        page += 1;
        source.between_pages().await?;
    }
    Ok(())
}

/// Baidu Tieba threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tieba;

impl PageSite for Tieba {
    const NAME: &'static str = "tieba";
    const BASE_URL: &'static str = "https://tieba.baidu.com";

    fn parse_id(input: &str) -> Option<ParsedId> {
        let input = input.trim();
        if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
            return Some(ParsedId::new(input));
        }
        THREAD_PATH
            .captures(input)
            .or_else(|| KZ_PARAM.captures(input))
            .and_then(|caps| caps.get(1))
            .map(|m| ParsedId::new(m.as_str()))
    }

    fn detail_url(base: &str, id: &ParsedId) -> String {
        format!("{base}/p/{}", id.canonical)
    }

    fn search_url(base: &str, keyword: &str, page: u32) -> String {
        let offset = page.saturating_sub(1) * 10;
        format!(
            "{base}/f/search/res?ie=utf-8&qw={}&pn={offset}",
            urlencoding::encode(keyword)
        )
    }

    /// Accepts a profile URL, `id=<portrait>`, `un=<name>` or a bare name.
    fn creator_url(base: &str, input: &str) -> Option<(String, String)> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if looks_like_url(input) {
            return Some((input.to_string(), sanitize_key(input)));
        }
        let (param, value) = match input.split_once('=') {
            Some(("id", value)) => ("id", value),
            Some(("un", value)) => ("un", value),
            _ => ("un", input),
        };
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        Some((
            format!("{base}/home/main?{param}={}", urlencoding::encode(value)),
            sanitize_key(value),
        ))
    }

    fn extract_ids(html: &str) -> Vec<ParsedId> {
        dedup_ids(LINKED_THREAD.captures_iter(html).filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| ParsedId::new(m.as_str()))
        }))
    }

    fn id_fields(id: &ParsedId) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("thread_id".into(), id.canonical.clone().into());
        fields
    }

    /// Walks the thread's pages from the one already fetched, following
    /// each floor's reply pages when sub-comments are wanted.
    fn collect_comments<'a>(
        source: CommentSource<'a>,
        id: &'a ParsedId,
        page: &'a FetchResponse,
        comments: &'a mut CommentCollector,
    ) -> BoxFuture<'a, Result<(), CrawlerError>> {
        Box::pin(async move {
            let thread = id.canonical.as_str();
            let mut body = page.body.clone();
            let mut page_no = 1;
            while !comments.is_full() {
                let mut added = 0;
                for floor in thread_floors(&body) {
                    if !comments.push(floor.comment.clone()) {
                        continue;
                    }
                    added += 1;
                    if comments.sub_comments() && floor.replies > 0 && !floor.forum_id.is_empty() {
                        collect_floor_replies(source, thread, &floor, comments).await?;
                    }
                }
                if added == 0 || comments.is_full() {
                    break;
                }
                page_no += 1;
                source.between_pages().await?;
                body = source
                    .fetch
                    .get_html(source.cancel, &thread_page_url(source.base, thread, page_no))
                    .await?
                    .body;
            }
            Ok(())
        })
    }
}
