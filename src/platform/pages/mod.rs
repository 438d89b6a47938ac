//! HTML page sites: fetch a page, store it verbatim with its fetch metadata,
//! and flag risk interstitials. Comments of recognised notes are collected
//! when enabled.
//!
//! Each site only describes its URLs, ids and comment sources through
//! [`PageSite`]; [`PageRunner`] drives the three modes the same way for all
//! of them.

mod comments;
mod kuaishou;
mod tieba;
mod zhihu;

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ids::{ParsedId, hash_key, invalid_id, looks_like_url};
use super::scaffold::{
    self, Page, effective_limits, new_result, record_risk, resolve_inputs, resolve_keywords,
};
use super::{Runner, RunnerContext};
use crate::crawler::{CrawlResult, CrawlerError, Mode, Request, RunOutcome, for_each_limit_paced};
use crate::fetch::{FetchClient, FetchResponse};

pub use self::comments::{CommentCollector, CommentSource};
pub use self::kuaishou::Kuaishou;
pub use self::tieba::Tieba;
pub use self::zhihu::Zhihu;

const DEFAULT_MAX_NOTES: usize = 20;

/// URL and id rules of one HTML site.
pub trait PageSite: Send + Sync + 'static {
    /// Canonical platform name.
    const NAME: &'static str;
    /// Production origin.
    const BASE_URL: &'static str;

    /// Id named by a URL or bare id, if any.
    fn parse_id(input: &str) -> Option<ParsedId>;

    fn detail_url(base: &str, id: &ParsedId) -> String;

    fn search_url(base: &str, keyword: &str, page: u32) -> String;

    /// Profile page URL and storage key for a creator input.
    fn creator_url(base: &str, input: &str) -> Option<(String, String)>;

    /// Ids linked from a search or profile page, in page order.
    fn extract_ids(html: &str) -> Vec<ParsedId>;

    /// Site-specific id columns added to the stored record.
    fn id_fields(id: &ParsedId) -> Map<String, Value>;

    /// Collects the comments of a fetched note page into `comments`.
    ///
    /// Comments gathered before an error are kept by the caller.
    fn collect_comments<'a>(
        source: CommentSource<'a>,
        id: &'a ParsedId,
        page: &'a FetchResponse,
        comments: &'a mut CommentCollector,
    ) -> BoxFuture<'a, Result<(), CrawlerError>>;
}

/// A page to fetch and where to store it.
#[derive(Debug, Clone)]
struct Target {
    url: String,
    key: String,
    fields: Map<String, Value>,
    /// Set when the site recognised the note, which enables comments.
    id: Option<ParsedId>,
}

impl Target {
    fn for_id<S: PageSite>(base: &str, id: &ParsedId) -> Self {
        Self {
            url: S::detail_url(base, id),
            key: id.note_key.clone(),
            fields: S::id_fields(id),
            id: Some(id.clone()),
        }
    }

    /// Resolves a detail input. URLs the site rules do not recognise are
    /// still fetched, stored under the digest of the URL.
    fn resolve<S: PageSite>(base: &str, input: &str) -> Result<Self, CrawlerError> {
        if let Some(id) = S::parse_id(input) {
            return Ok(Self::for_id::<S>(base, &id));
        }
        if looks_like_url(input) {
            let url = input.trim().to_string();
            let mut fields = Map::new();
            fields.insert("input_url".to_string(), Value::String(url.clone()));
            return Ok(Self {
                key: hash_key(&url),
                url,
                fields,
                id: None,
            });
        }
        Err(invalid_id(S::NAME, input, "page id"))
    }
}

/// Stored form of a fetched page.
fn page_record(response: &FetchResponse, fields: &Map<String, Value>) -> Value {
    let mut record = Map::new();
    record.insert("url".into(), response.url.clone().into());
    record.insert("status_code".into(), response.status.into());
    record.insert("content_type".into(), response.content_type.clone().into());
    record.insert("body".into(), response.body.clone().into());
    record.insert("original_len".into(), response.original_len.into());
    record.insert("truncated".into(), response.truncated.into());
    record.insert("fetched_at".into(), response.fetched_at.into());
    for (key, value) in fields {
        record.insert(key.clone(), value.clone());
    }
    record.insert(
        "risk_hint".into(),
        response
            .risk_hint()
            .map_or(Value::Null, |hint| hint.as_str().into()),
    );
    Value::Object(record)
}

/// Runner for any [`PageSite`].
pub struct PageRunner<S> {
    ctx: RunnerContext,
    fetch: FetchClient,
    base: String,
    site: PhantomData<fn() -> S>,
}

impl<S: PageSite> fmt::Debug for PageRunner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRunner")
            .field("site", &S::NAME)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl<S: PageSite> PageRunner<S> {
    #[must_use]
    pub fn new(ctx: RunnerContext) -> Self {
        Self::with_base_url(ctx, S::BASE_URL)
    }

    /// Runner against another origin (tests point this at a mock server).
    #[must_use]
    pub fn with_base_url(ctx: RunnerContext, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        let fetch = ctx.fetch.for_platform(S::NAME).with_referer(&format!("{base}/"));
        Self {
            ctx,
            fetch,
            base,
            site: PhantomData,
        }
    }

    /// Fetches and stores one page. The record is written before the risk
    /// check so interstitials stay inspectable.
    #[instrument(skip(self, cancel, target), fields(platform = S::NAME, url = %target.url))]
    async fn crawl_page(&self, cancel: &CancellationToken, target: Target) -> Result<(), CrawlerError> {
        let response = self.fetch.get_html(cancel, &target.url).await?;
        let record = page_record(&response, &target.fields);
        self.ctx
            .store
            .save_note_detail(cancel, &target.key, &record)
            .await?;
        record_risk(S::NAME, &response)?;
        debug!(note_id = %target.key, bytes = response.original_len, "page saved");
        if let Some(id) = target.id.as_ref().filter(|_| self.ctx.config.enable_get_comments) {
            self.crawl_comments(cancel, id, &response).await;
        }
        Ok(())
    }

    /// Collects and stores a note's comments. Failures are logged and what
    /// was collected before them is still stored.
    async fn crawl_comments(&self, cancel: &CancellationToken, id: &ParsedId, page: &FetchResponse) {
        let config = &self.ctx.config;
        let source = CommentSource {
            fetch: &self.fetch,
            cancel,
            base: &self.base,
            pause: config.item_pause(),
        };
        let mut comments = CommentCollector::new(
            S::NAME,
            &id.note_key,
            config.crawler_max_comments_count_singlenotes,
            config.enable_get_sub_comments,
        );
        if let Err(err) = S::collect_comments(source, id, page, &mut comments).await {
            warn!(platform = S::NAME, note_id = %id.note_key, error = %err, "comments incomplete");
        }
        let comments = comments.into_comments();
        debug!(note_id = %id.note_key, count = comments.len(), "comments collected");
        scaffold::save_comments(&self.ctx.store, cancel, &id.note_key, &comments).await;
    }

    async fn run_detail(
        &self,
        cancel: &CancellationToken,
        request: &Request,
        result: &mut CrawlResult,
    ) -> Result<(), CrawlerError> {
        let inputs = resolve_inputs(S::NAME, request)?;
        let limits = effective_limits(request, inputs.len());
        let base = self.base.as_str();
        let stats = for_each_limit_paced(
            cancel,
            inputs,
            limits.concurrency,
            self.ctx.config.item_pause(),
            |token, input: String| async move {
                let target = Target::resolve::<S>(base, &input)?;
                self.crawl_page(&token, target).await
            },
        )
        .await;
        result.absorb(&stats);
        Ok(())
    }

    async fn run_search(
        &self,
        cancel: &CancellationToken,
        request: &Request,
        result: &mut CrawlResult,
    ) -> Result<(), CrawlerError> {
        let keywords = resolve_keywords(S::NAME, request)?;
        let limits = effective_limits(request, DEFAULT_MAX_NOTES);
        let base = self.base.as_str();
        let fetch = &self.fetch;
        let mut seen = HashSet::new();
        for keyword in &keywords {
            if limits.remaining(result) == 0 {
                info!(platform = S::NAME, max_notes = limits.max_notes, "note cap reached");
                break;
            }
            info!(platform = S::NAME, keyword = %keyword, "searching");
            scaffold::paginate(
                cancel,
                result,
                limits,
                self.ctx.config.item_pause(),
                &mut seen,
                |id: &ParsedId| id.note_key.clone(),
                |page| async move {
                    let response = fetch.get_html(cancel, &S::search_url(base, keyword, page)).await?;
                    record_risk(S::NAME, &response)?;
                    Ok(Page::more(S::extract_ids(&response.body)))
                },
                |token, id: ParsedId| async move {
                    self.crawl_page(&token, Target::for_id::<S>(base, &id)).await
                },
            )
            .await?;
        }
        Ok(())
    }

    /// Stores each creator's profile page, then crawls the notes it links
    /// to. A risk page on the profile stops the job.
    async fn run_creator(
        &self,
        cancel: &CancellationToken,
        request: &Request,
        result: &mut CrawlResult,
    ) -> Result<(), CrawlerError> {
        let inputs = resolve_inputs(S::NAME, request)?;
        let limits = effective_limits(request, DEFAULT_MAX_NOTES);
        let base = self.base.as_str();
        let mut seen = HashSet::new();
        for input in &inputs {
            let (url, key) =
                S::creator_url(base, input).ok_or_else(|| invalid_id(S::NAME, input, "creator"))?;
            let response = self.fetch.get_html(cancel, &url).await?;
            let mut fields = Map::new();
            fields.insert("creator_input".into(), input.clone().into());
            self.ctx
                .store
                .save_creator_profile(cancel, &key, &page_record(&response, &fields))
                .await?;
            record_risk(S::NAME, &response)?;
            info!(platform = S::NAME, creator_id = %key, "creator page saved");

            let remaining = limits.remaining(result);
            if remaining == 0 {
                continue;
            }
            let ids = scaffold::filter_new_ids(
                S::extract_ids(&response.body),
                &mut seen,
                remaining,
                |id: &ParsedId| id.note_key.clone(),
            );
            let stats = for_each_limit_paced(
                cancel,
                ids,
                limits.concurrency,
                self.ctx.config.item_pause(),
                |token, id: ParsedId| async move {
                    self.crawl_page(&token, Target::for_id::<S>(base, &id)).await
                },
            )
            .await;
            result.absorb(&stats);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: PageSite> Runner for PageRunner<S> {
    async fn run(&self, cancel: CancellationToken, mut request: Request) -> RunOutcome {
        request.platform = S::NAME.to_string();
        let mut result = new_result(S::NAME, &request);
        let outcome = match request.mode {
            Mode::Detail => self.run_detail(&cancel, &request, &mut result).await,
            Mode::Search => self.run_search(&cancel, &request, &mut result).await,
            Mode::Creator => self.run_creator(&cancel, &request, &mut result).await,
        };
        scaffold::finish(&cancel, result, outcome.err())
    }
}

/// Unique ids in first-seen order.
fn dedup_ids(ids: impl IntoIterator<Item = ParsedId>) -> Vec<ParsedId> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.note_key.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::Config;
    use crate::crawler::ErrorKind;
    use crate::platform::testutil::{context, quiet_config};

    async fn tieba(server: &MockServer, dir: &TempDir) -> PageRunner<Tieba> {
        let ctx = context(dir.path(), quiet_config("tieba")).await;
        PageRunner::with_base_url(ctx, &server.uri())
    }

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
    }

    fn comments_config(platform: &str) -> Config {
        Config {
            enable_get_comments: true,
            enable_get_sub_comments: true,
            crawler_max_comments_count_singlenotes: 10,
            ..quiet_config(platform)
        }
    }

    fn read_jsonl(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn detail(input: &str) -> Request {
        Request {
            mode: Mode::Detail,
            inputs: vec![input.into()],
            ..Request::default()
        }
    }

    fn read_note(dir: &TempDir, key: &str) -> Value {
        let raw = std::fs::read_to_string(dir.path().join(format!("tieba/notes/{key}/note.json"))).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_dedup_ids_keeps_first() {
        let ids = dedup_ids(["1", "2", "1"].map(ParsedId::new));
        let keys: Vec<_> = ids.iter().map(|id| id.note_key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
    }

    // ==================== Detail Tests ====================

    #[tokio::test]
    async fn test_detail_stores_page_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/8123456789"))
            .respond_with(html("<html><title>thread</title></html>"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;

        let request = Request {
            mode: Mode::Detail,
            inputs: vec!["https://tieba.baidu.com/p/8123456789?pn=2".into(), "no id here".into()],
            ..Request::default()
        };
        let outcome = runner.run(CancellationToken::new(), request).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.result.succeeded, 1);
        assert_eq!(outcome.result.failure_kinds[&ErrorKind::InvalidInput], 1);

        let record = read_note(&dir, "8123456789");
        assert_eq!(record["status_code"], 200);
        assert_eq!(record["thread_id"], "8123456789");
        assert_eq!(record["truncated"], false);
        assert_eq!(record["risk_hint"], Value::Null);
        assert!(record["body"].as_str().unwrap().contains("thread"));
    }

    #[tokio::test]
    async fn test_risk_page_is_saved_then_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/42"))
            .respond_with(html("<div>请输入验证码</div>"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;
        let request = Request {
            mode: Mode::Detail,
            inputs: vec!["42".into()],
            ..Request::default()
        };
        let result = runner.run(CancellationToken::new(), request).await.result;
        assert_eq!(result.failure_kinds[&ErrorKind::RiskHint], 1);
        assert_eq!(read_note(&dir, "42")["risk_hint"], "captcha");
    }

    #[tokio::test]
    async fn test_unrecognised_url_is_stored_under_digest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/somewhere/else"))
            .respond_with(html("<p>plain</p>"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;
        let url = format!("{}/somewhere/else", server.uri());
        let request = Request {
            mode: Mode::Detail,
            inputs: vec![url.clone()],
            ..Request::default()
        };
        let outcome = runner.run(CancellationToken::new(), request).await;
        assert_eq!(outcome.result.succeeded, 1);
        assert_eq!(read_note(&dir, &hash_key(&url))["input_url"], json!(url));
    }

    // ==================== Search Tests ====================

    #[tokio::test]
    async fn test_search_extracts_thread_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f/search/res"))
            .and(query_param("pn", "0"))
            .respond_with(html(r#"<a data-tid="101" href="/p/101">a</a><a href="/p/102?fid=1">b</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/f/search/res"))
            .respond_with(html("<p>nothing</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/101"))
            .respond_with(html("one"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/102"))
            .respond_with(html("two"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;
        let request = Request {
            keywords: vec!["rust".into()],
            ..Request::default()
        };
        let outcome = runner.run(CancellationToken::new(), request).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.result.succeeded, 2);
        assert_eq!(read_note(&dir, "102")["body"], "two");
    }

    #[tokio::test]
    async fn test_search_risk_page_is_job_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f/search/res"))
            .respond_with(html("Access Denied"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;
        let request = Request {
            keywords: vec!["rust".into()],
            ..Request::default()
        };
        let outcome = runner.run(CancellationToken::new(), request).await;
        assert_eq!(outcome.error.unwrap().kind(), ErrorKind::RiskHint);
    }

    // ==================== Creator Tests ====================

    #[tokio::test]
    async fn test_creator_saves_profile_and_linked_threads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/home/main"))
            .and(query_param("un", "someone"))
            .respond_with(html(r#"<a href="/p/201">post</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/201"))
            .respond_with(html("thread"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let runner = tieba(&server, &dir).await;
        let request = Request {
            mode: Mode::Creator,
            inputs: vec!["someone".into()],
            ..Request::default()
        };
        let outcome = runner.run(CancellationToken::new(), request).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.result.succeeded, 1);
        assert!(dir.path().join("tieba/creators/someone/profile.json").exists());
    }

    // ==================== Comment Tests ====================

    #[tokio::test]
    async fn test_tieba_comments_follow_floors_and_replies() {
        let server = MockServer::start().await;
        let floors = r#"<div data-field='{"author":{"user_id":1,"user_name":"amy"},"content":{"post_id":11,"forum_id":3,"comment_num":1,"content":"first"}}'></div>
            <div data-field='{"author":{"user_id":2,"user_name":"bo"},"content":{"post_id":12,"forum_id":3,"comment_num":0,"content":"second"}}'></div>"#;
        Mock::given(method("GET"))
            .and(path("/p/300"))
            .and(query_param("pn", "2"))
            .respond_with(html(floors))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/300"))
            .respond_with(html(floors))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/comment"))
            .and(query_param("tid", "300"))
            .and(query_param("pid", "11"))
            .and(query_param("fid", "3"))
            .and(query_param("pn", "1"))
            .respond_with(html(
                r#"<li data-field='{"spid":21,"showname":"cy"}'><span class="lzl_content_main"> thanks </span></li>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/comment"))
            .respond_with(html("<ul></ul>"))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), comments_config("tieba")).await;
        let runner = PageRunner::<Tieba>::with_base_url(ctx, &server.uri());

        let outcome = runner.run(CancellationToken::new(), detail("300")).await;
        assert_eq!(outcome.result.succeeded, 1);

        let comments = read_jsonl(&dir.path().join("tieba/notes/300/comments.jsonl"));
        let ids: Vec<_> = comments.iter().map(|c| c["comment_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["11", "21", "12"]);
        assert_eq!(comments[1]["parent_comment_id"], "11");
        assert_eq!(comments[1]["content"], "thanks");
        assert_eq!(comments[0]["platform"], "tieba");
        assert_eq!(comments[0]["note_id"], "300");
        assert_eq!(read_jsonl(&dir.path().join("tieba/comments.jsonl")).len(), 3);
    }

    #[tokio::test]
    async fn test_tieba_comment_cap_and_disabled() {
        let server = MockServer::start().await;
        let floors: String = (1..=5)
            .map(|i| format!(r#"<div data-field='{{"content":{{"post_id":{i},"content":"c{i}"}}}}'></div>"#))
            .collect();
        Mock::given(method("GET"))
            .and(path("/p/301"))
            .respond_with(html(&floors))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = Config {
            crawler_max_comments_count_singlenotes: 2,
            ..comments_config("tieba")
        };
        let runner = PageRunner::<Tieba>::with_base_url(context(dir.path(), config).await, &server.uri());
        runner.run(CancellationToken::new(), detail("301")).await;
        assert_eq!(read_jsonl(&dir.path().join("tieba/notes/301/comments.jsonl")).len(), 2);

        let quiet = TempDir::new().unwrap();
        let runner = tieba(&server, &quiet).await;
        runner.run(CancellationToken::new(), detail("301")).await;
        assert!(!quiet.path().join("tieba/notes/301/comments.jsonl").exists());
    }

    #[tokio::test]
    async fn test_zhihu_comments_page_through_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/question/1/answer/2"))
            .respond_with(html("<p>answer</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/answers/2/root_comments"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 10, "content": "<p>root</p>", "child_comment_count": 1, "author": {"id": "u1", "name": "amy"}}],
                "paging": {"is_end": false}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/answers/2/root_comments"))
            .and(query_param("offset", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 11, "content": "second"}],
                "paging": {"is_end": true}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/comments/10/child_comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 12, "content": "child", "reply_to": {"id": 0}}],
                "paging": {"is_end": true}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/answers/2/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(0)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), comments_config("zhihu")).await;
        let runner = PageRunner::<Zhihu>::with_base_url(ctx, &server.uri());

        let outcome = runner
            .run(CancellationToken::new(), detail("https://www.zhihu.com/question/1/answer/2"))
            .await;
        assert_eq!(outcome.result.succeeded, 1);

        let comments = read_jsonl(&dir.path().join("zhihu/notes/1_2/comments.jsonl"));
        let ids: Vec<_> = comments.iter().map(|c| c["comment_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["10", "12", "11"]);
        assert_eq!(comments[0]["content"], "root");
        assert_eq!(comments[0]["user_nickname"], "amy");
        assert_eq!(comments[1]["parent_comment_id"], "10");
    }

    #[tokio::test]
    async fn test_kuaishou_comments_follow_pcursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short-video/3xabc"))
            .respond_with(html("<p>video</p>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"photoId": "3xabc", "pcursor": ""}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"shortVideoCommentList": {
                "pcursor": "p2",
                "commentList": [{"commentId": "a", "content": "first", "timestamp": 1_700_000_000_000_i64, "authorName": "amy"}]
            }}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({"variables": {"pcursor": "p2"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"shortVideoCommentList": {
                "pcursor": "no_more",
                "commentList": [{"commentId": "b", "content": "second"}]
            }}})))
            .expect(1)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), comments_config("kuaishou")).await;
        let runner = PageRunner::<Kuaishou>::with_base_url(ctx, &server.uri());

        let outcome = runner.run(CancellationToken::new(), detail("3xabc")).await;
        assert_eq!(outcome.result.succeeded, 1);

        let comments = read_jsonl(&dir.path().join("kuaishou/notes/3xabc/comments.jsonl"));
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0]["create_time"], 1_700_000_000);
        assert_eq!(comments[1]["comment_id"], "b");
    }

    #[tokio::test]
    async fn test_kuaishou_comments_fall_back_to_page_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/short-video/3xdef"))
            .respond_with(html(
                r#"<script id="__NEXT_DATA__" type="application/json">{"props":{"commentList":[{"commentId":"s1","content":"from page"}]}}</script>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), comments_config("kuaishou")).await;
        let runner = PageRunner::<Kuaishou>::with_base_url(ctx, &server.uri());

        let outcome = runner.run(CancellationToken::new(), detail("3xdef")).await;
        assert_eq!(outcome.result.succeeded, 1);
        let comments = read_jsonl(&dir.path().join("kuaishou/notes/3xdef/comments.jsonl"));
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0]["content"], "from page");
    }
}
