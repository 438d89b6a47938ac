use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::comments::{CommentCollector, CommentSource, html_text, id_str, pick};
use super::{PageSite, dedup_ids};
use crate::crawler::CrawlerError;
use crate::fetch::FetchResponse;
use crate::platform::ids::{ParsedId, looks_like_url, sanitize_key};
use crate::platform::scaffold::{value_i64, value_str};
use crate::store::UnifiedComment;

const COMMENT_PAGE_SIZE: usize = 20;

/// Answer comment listings, tried in order.
const ROOT_COMMENT_PATHS: [&str; 2] = ["root_comments", "comments"];

#[allow(clippy::expect_used)]
static QUESTION_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"zhihu\.com/question/(\d+)(?:/answer/(\d+))?").expect("question url regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static QUESTION_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/question/(\d+)(?:/answer/(\d+))?").expect("question link regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PEOPLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/people/([^/?#]+)").expect("people path regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static INITIAL_DATA: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script#js-initialData").expect("initial data selector is valid") // Static pattern, safe to panic
});

/// Cursor over a v4 list endpoint. Follows `paging.next`, stepping the
/// `offset` query itself when the link is missing.
#[derive(Debug)]
struct ListCursor {
    next: Option<String>,
    offset: usize,
}

impl ListCursor {
    fn new(first: String) -> Self {
        Self {
            next: Some(first),
            offset: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.next.is_none()
    }

    async fn next_page(&mut self, source: CommentSource<'_>) -> Result<Option<Vec<Value>>, CrawlerError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        let body: Value = source.fetch.get_json_value(source.cancel, &url).await?;
        let items = body["data"].as_array().cloned().unwrap_or_default();
        let paging = &body["paging"];
        if !items.is_empty() && !paging["is_end"].as_bool().unwrap_or(false) {
            self.offset += COMMENT_PAGE_SIZE;
            let next = value_str(&paging["next"]);
            self.next = Some(if next.starts_with("http") {
                next
            } else {
                with_offset(&url, self.offset)
            });
        }
        Ok(Some(items))
    }
}

/// `raw` with its `offset` query replaced.
fn with_offset(raw: &str, offset: usize) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "offset")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(&pairs)
        .append_pair("offset", &offset.to_string());
    url.into()
}

/// Comment from an API item; field names vary between API versions.
fn api_comment(item: &Value) -> UnifiedComment {
    let author = pick(item, &["author", "user"]);
    let mut parent = id_str(&pick(item, &["reply_to", "replyTo"])["id"]);
    if parent.is_empty() {
        parent = id_str(pick(item, &["reply_to_comment_id", "replyToCommentId"]));
    }
    UnifiedComment {
        comment_id: id_str(pick(item, &["id", "comment_id", "commentId"])),
        parent_comment_id: parent,
        content: html_text(&value_str(pick(item, &["content", "text", "body"]))),
        create_time: value_i64(pick(item, &["created_time", "createdTime", "created"])),
        like_count: value_i64(pick(item, &["like_count", "likeCount", "vote_count", "voteCount"])),
        user_id: value_str(pick(author, &["id", "member_id", "url_token", "urlToken"])),
        user_nickname: value_str(pick(author, &["name", "nickname"])),
        ..UnifiedComment::default()
    }
}

fn child_comment_urls(base: &str, comment: &str) -> [String; 2] {
    [
        format!("{base}/api/v4/comments/{comment}/child_comments?limit={COMMENT_PAGE_SIZE}&offset=0"),
        format!("{base}/api/v4/comment_v5/comments/{comment}/child_comment"),
    ]
}

/// Replies to one root comment, from the first listing that has any.
async fn collect_children(
    source: CommentSource<'_>,
    root: &str,
    comments: &mut CommentCollector,
) -> Result<(), CrawlerError> {
    for first in child_comment_urls(source.base, root) {
        let before = comments.len();
        let mut cursor = ListCursor::new(first);
        while !comments.is_full() {
            let Some(items) = cursor.next_page(source).await? else {
                break;
            };
            let mut added = 0;
            for item in &items {
                let mut comment = api_comment(item);
                if comment.parent_comment_id.is_empty() {
                    comment.parent_comment_id = root.to_string();
                }
                if comments.push(comment) {
                    added += 1;
                }
            }
            if added == 0 || cursor.exhausted() {
                break;
            }
            source.between_pages().await?;
        }
        if comments.len() > before {
            break;
        }
    }
    Ok(())
}

/// Root comments of one listing, each followed by its replies when
/// sub-comments are wanted.
async fn collect_listing(
    source: CommentSource<'_>,
    first: String,
    comments: &mut CommentCollector,
) -> Result<(), CrawlerError> {
    let mut cursor = ListCursor::new(first);
    while !comments.is_full() {
        let Some(items) = cursor.next_page(source).await? else {
            break;
        };
        let mut added = 0;
        for item in &items {
            let comment = api_comment(item);
            if !comments.sub_comments() && !comment.parent_comment_id.is_empty() {
                continue;
            }
            let root = comment.comment_id.clone();
            if !comments.push(comment) {
                continue;
            }
            added += 1;
            let children = value_i64(pick(item, &["child_comment_count", "childCommentCount"]));
            if comments.sub_comments() && children > 0 {
                match collect_children(source, &root, comments).await {
                    Err(CrawlerError::Canceled) => return Err(CrawlerError::Canceled),
                    Err(err) => debug!(comment_id = %root, error = %err, "child comments skipped"),
                    Ok(()) => {}
                }
            }
        }
        if added == 0 || cursor.exhausted() {
            break;
        }
        source.between_pages().await?;
    }
    Ok(())
}

/// Comments embedded in the page's initial state.
fn initial_state_comments(html: &str, sub_comments: bool) -> Vec<UnifiedComment> {
    let doc = Html::parse_document(html);
    let Some(script) = doc.select(&INITIAL_DATA).next() else {
        return Vec::new();
    };
    let raw: String = script.text().collect();
    let Ok(state) = serde_json::from_str::<Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(entities) = state["initialState"]["entities"]["comments"].as_object() else {
        return Vec::new();
    };
    entities
        .values()
        .map(api_comment)
        .filter(|c| sub_comments || c.parent_comment_id.is_empty())
        .collect()
}

/// Question or answer id; keyed `<question>` or `<question>_<answer>`.
fn question(question: &str, answer: Option<&str>) -> ParsedId {
    match answer {
        Some(answer) => ParsedId::with_key(
            format!("{question}/answer/{answer}"),
            format!("{question}_{answer}"),
        ),
        None => ParsedId::new(question),
    }
}

fn from_captures(caps: &regex::Captures<'_>) -> Option<ParsedId> {
    let q = caps.get(1)?.as_str();
    Some(question(q, caps.get(2).map(|m| m.as_str())))
}

/// Zhihu questions and answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zhihu;

impl PageSite for Zhihu {
    const NAME: &'static str = "zhihu";
    const BASE_URL: &'static str = "https://www.zhihu.com";

    fn parse_id(input: &str) -> Option<ParsedId> {
        let input = input.trim();
        if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
            return Some(question(input, None));
        }
        QUESTION_URL.captures(input).as_ref().and_then(from_captures)
    }

    fn detail_url(base: &str, id: &ParsedId) -> String {
        format!("{base}/question/{}", id.canonical)
    }

    fn search_url(base: &str, keyword: &str, page: u32) -> String {
        format!(
            "{base}/search?type=content&q={}&page={page}",
            urlencoding::encode(keyword)
        )
    }

    /// Accepts a `/people/<token>` URL or a bare url token.
    fn creator_url(base: &str, input: &str) -> Option<(String, String)> {
        let input = input.trim();
        if looks_like_url(input) {
            let token = PEOPLE_PATH.captures(input)?.get(1)?.as_str();
            return Some((input.to_string(), sanitize_key(token)));
        }
        if input.is_empty() {
            return None;
        }
        Some((
            format!("{base}/people/{}", urlencoding::encode(input)),
            sanitize_key(input),
        ))
    }

    fn extract_ids(html: &str) -> Vec<ParsedId> {
        dedup_ids(
            QUESTION_LINK
                .captures_iter(html)
                .filter_map(|caps| from_captures(&caps)),
        )
    }

    fn id_fields(id: &ParsedId) -> Map<String, Value> {
        let mut fields = Map::new();
        let (question, answer) = match id.canonical.split_once("/answer/") {
            Some((q, a)) => (q, a),
            None => (id.canonical.as_str(), ""),
        };
        fields.insert("question_id".into(), question.into());
        fields.insert("answer_id".into(), answer.into());
        fields
    }

    /// Reads an answer's comments from the v4 API, falling back to the
    /// page's initial state. Question pages have no comment listing.
    fn collect_comments<'a>(
        source: CommentSource<'a>,
        id: &'a ParsedId,
        page: &'a FetchResponse,
        comments: &'a mut CommentCollector,
    ) -> BoxFuture<'a, Result<(), CrawlerError>> {
        Box::pin(async move {
            let Some((_, answer)) = id.canonical.split_once("/answer/") else {
                return Ok(());
            };
            for listing in ROOT_COMMENT_PATHS {
                let first = format!(
                    "{}/api/v4/answers/{answer}/{listing}?order_by=score&limit={COMMENT_PAGE_SIZE}&offset=0&status=open",
                    source.base
                );
                match collect_listing(source, first, comments).await {
                    Err(CrawlerError::Canceled) => return Err(CrawlerError::Canceled),
                    Err(err) => debug!(listing, error = %err, "comment listing failed"),
                    Ok(()) => {}
                }
                if !comments.is_empty() {
                    return Ok(());
                }
            }
            for comment in initial_state_comments(&page.body, comments.sub_comments()) {
                comments.push(comment);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_question_and_answer() {
        let id = Zhihu::parse_id("https://www.zhihu.com/question/123/answer/456").unwrap();
        assert_eq!(id.canonical, "123/answer/456");
        assert_eq!(id.note_key, "123_456");
        assert_eq!(Zhihu::detail_url("https://www.zhihu.com", &id), "https://www.zhihu.com/question/123/answer/456");
        let fields = Zhihu::id_fields(&id);
        assert_eq!(fields["question_id"], "123");
        assert_eq!(fields["answer_id"], "456");

        assert_eq!(Zhihu::parse_id("789").unwrap().note_key, "789");
        assert!(Zhihu::parse_id("https://www.zhihu.com/people/x").is_none());
    }

    #[test]
    fn test_creator_url() {
        let base = "https://www.zhihu.com";
        assert_eq!(
            Zhihu::creator_url(base, "https://www.zhihu.com/people/ming-zi/answers").unwrap().1,
            "ming-zi"
        );
        assert_eq!(Zhihu::creator_url(base, "ming-zi").unwrap().0, "https://www.zhihu.com/people/ming-zi");
        assert!(Zhihu::creator_url(base, "https://www.zhihu.com/topic/1").is_none());
    }

    #[test]
    fn test_api_comment_field_variants() {
        let v4 = serde_json::json!({
            "id": 5, "content": "<p>hello</p>", "created_time": 100, "like_count": 3,
            "author": {"member": null, "id": "u1", "name": "amy"}, "reply_to": {"id": 0}
        });
        let comment = api_comment(&v4);
        assert_eq!(comment.comment_id, "5");
        assert_eq!(comment.content, "hello");
        assert_eq!(comment.parent_comment_id, "");
        assert_eq!(comment.user_nickname, "amy");

        let v5 = serde_json::json!({"commentId": "6", "text": "hi", "replyToCommentId": "5", "voteCount": 2, "user": {"urlToken": "t"}});
        let comment = api_comment(&v5);
        assert_eq!(comment.comment_id, "6");
        assert_eq!(comment.parent_comment_id, "5");
        assert_eq!(comment.like_count, 2);
        assert_eq!(comment.user_id, "t");
    }

    #[test]
    fn test_with_offset_replaces_query() {
        assert_eq!(
            with_offset("https://www.zhihu.com/api/v4/answers/1/root_comments?limit=20&offset=0", 40),
            "https://www.zhihu.com/api/v4/answers/1/root_comments?limit=20&offset=40"
        );
    }

    #[test]
    fn test_initial_state_comments() {
        let html = r#"<script id="js-initialData" type="text/json">{"initialState":{"entities":{"comments":{"1":{"id":1,"content":"root"},"2":{"id":2,"content":"reply","replyToCommentId":1}}}}}</script>"#;
        assert_eq!(initial_state_comments(html, true).len(), 2);
        let roots = initial_state_comments(html, false);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].content, "root");
    }

    #[test]
    fn test_extract_ids_from_links() {
        let html = r#"<a href="//www.zhihu.com/question/1/answer/2">a</a><a href="/question/3">q</a><a href="/question/1/answer/2">dup</a>"#;
        let keys: Vec<_> = Zhihu::extract_ids(html).into_iter().map(|id| id.note_key).collect();
        assert_eq!(keys, vec!["1_2", "3"]);
    }
}
