//! Weibo runner over the mobile site's JSON API.
//!
//! Responses wrap their payload as `{ok, data}`; `ok != 1` is an API error
//! unless the message carries a risk marker.

mod comments;
mod media;
mod parse;

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use self::parse::parse_creator_uid;
use super::scaffold::{
    self, Page, download_media, effective_limits, endpoint, media_headers, new_result,
    resolve_inputs, resolve_keywords, save_comments, value_i64, value_str,
};
use super::{Runner, RunnerContext};
use crate::crawler::{CrawlResult, CrawlerError, Mode, Request, RunOutcome, detect_risk_hint, for_each_limit_paced};
use crate::fetch::FetchClient;
use crate::platform::ids::{ParsedId, sanitize_key};

pub use self::parse::parse_status_id;

/// Production mobile host.
pub const WEIBO_API_BASE: &str = "https://m.weibo.cn";

const PLATFORM: &str = "weibo";
const DEFAULT_SEARCH_NOTES: usize = 20;
const DEFAULT_CREATOR_NOTES: usize = 50;
/// `card_type` of cards that wrap a status.
const STATUS_CARD: i64 = 9;

#[derive(Debug, Clone)]
struct Api {
    fetch: FetchClient,
    base: String,
}

impl Api {
    fn with_referer(&self, referer: &str) -> Self {
        Self {
            fetch: self.fetch.with_referer(referer),
            base: self.base.clone(),
        }
    }

    /// GETs `path` and unwraps `data`.
    async fn call(
        &self,
        cancel: &CancellationToken,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, CrawlerError> {
        let url = endpoint(PLATFORM, &self.base, path, params)?;
        let mut body: Value = self.fetch.get_json_value(cancel, &url).await?;
        if value_i64(&body["ok"]) == 1 {
            return Ok(body["data"].take());
        }
        let message = match value_str(&body["msg"]) {
            msg if msg.is_empty() => value_str(&body["message"]),
            msg => msg,
        };
        if let Some(hint) = detect_risk_hint(&message) {
            return Err(CrawlerError::risk_hint(PLATFORM, url, hint));
        }
        Err(CrawlerError::api(
            PLATFORM,
            format!("{path}: ok={} msg={message}", value_str(&body["ok"])),
        ))
    }
}

/// Status ids carried by a card list, including nested card groups.
fn status_ids(cards: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for card in cards.as_array().into_iter().flatten() {
        if value_i64(&card["card_type"]) == STATUS_CARD {
            let id = value_str(&card["mblog"]["id"]);
            if !id.is_empty() {
                out.push(id);
            }
        }
        out.extend(status_ids(&card["card_group"]));
    }
    out
}

/// Statuses by id, keyword search or user timeline.
#[derive(Debug)]
pub struct WeiboRunner {
    ctx: RunnerContext,
    api: Api,
}

impl WeiboRunner {
    #[must_use]
    pub fn new(ctx: RunnerContext) -> Self {
        Self::with_base_url(ctx, WEIBO_API_BASE)
    }

    /// Runner against another host (tests point this at a mock server).
    #[must_use]
    pub fn with_base_url(ctx: RunnerContext, base: &str) -> Self {
        let fetch = ctx
            .fetch
            .for_platform(PLATFORM)
            .with_referer(&format!("{WEIBO_API_BASE}/"))
            .with_header("MWeibo-Pwa", "1")
            .with_header("X-Requested-With", "XMLHttpRequest");
        Self {
            api: Api {
                fetch,
                base: base.trim_end_matches('/').to_string(),
            },
            ctx,
        }
    }

    #[instrument(skip(self, cancel), fields(platform = PLATFORM))]
    async fn crawl_status(&self, cancel: &CancellationToken, id: &ParsedId) -> Result<(), CrawlerError> {
        let referer = format!("{WEIBO_API_BASE}/detail/{}", id.canonical);
        let api = self.api.with_referer(&referer);
        let status = api
            .call(cancel, "/statuses/show", &[("id", id.canonical.clone())])
            .await?;
        let store = &self.ctx.store;
        store.save_note_detail(cancel, &id.note_key, &status).await?;

        let config = &self.ctx.config;
        if config.enable_get_comments {
            // The numeric id is what hotflow accepts; base62 inputs resolve to it.
            let numeric = match value_str(&status["id"]) {
                sid if sid.is_empty() => id.canonical.clone(),
                sid => sid,
            };
            let fetched = comments::fetch_comments(
                &api,
                cancel,
                &numeric,
                &id.note_key,
                config.enable_get_sub_comments,
                config.crawler_max_comments_count_singlenotes,
            )
            .await;
            match fetched {
                Ok(list) => {
                    save_comments(store, cancel, &id.note_key, &list).await;
                }
                Err(err) => warn!(note_id = %id.note_key, error = %err, "comments unavailable"),
            }
        }
        if config.enable_get_medias {
            let items = media::collect(&status, &id.note_key);
            let headers = media_headers(&format!("{WEIBO_API_BASE}/"), &config.cookies);
            download_media(store, config, cancel, &id.note_key, &items, &headers).await;
        }
        Ok(())
    }

    async fn run_detail(
        &self,
        cancel: &CancellationToken,
        request: &Request,
        result: &mut CrawlResult,
    ) -> Result<(), CrawlerError> {
        let inputs = resolve_inputs(PLATFORM, request)?;
        let limits = effective_limits(request, inputs.len());
        let stats = for_each_limit_paced(
            cancel,
            inputs,
            limits.concurrency,
            self.ctx.config.item_pause(),
            |token, input: String| async move {
                let id = parse_status_id(&input)?;
                self.crawl_status(&token, &id).await
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
        let keywords = resolve_keywords(PLATFORM, request)?;
        let limits = effective_limits(request, DEFAULT_SEARCH_NOTES);
        let search_type = match self.ctx.config.weibo_search_type.trim() {
            "" => "1",
            t => t,
        };
        let api = &self.api;
        let mut seen = HashSet::new();
        for keyword in &keywords {
            if limits.remaining(result) == 0 {
                info!(platform = PLATFORM, max_notes = limits.max_notes, "note cap reached");
                break;
            }
            info!(platform = PLATFORM, keyword = %keyword, "searching");
            scaffold::paginate(
                cancel,
                result,
                limits,
                self.ctx.config.item_pause(),
                &mut seen,
                |id: &String| sanitize_key(id),
                |page| async move {
                    let data = api
                        .call(
                            cancel,
                            "/api/container/getIndex",
                            &[
                                ("containerid", format!("100103type={search_type}&q={keyword}")),
                                ("page_type", "searchall".to_string()),
                                ("page", page.to_string()),
                            ],
                        )
                        .await?;
                    Ok(Page::more(status_ids(&data["cards"])))
                },
                |token, id: String| async move { self.crawl_status(&token, &ParsedId::new(id)).await },
            )
            .await?;
        }
        Ok(())
    }

    async fn run_creator(
        &self,
        cancel: &CancellationToken,
        request: &Request,
        result: &mut CrawlResult,
    ) -> Result<(), CrawlerError> {
        let inputs = resolve_inputs(PLATFORM, request)?;
        let limits = effective_limits(request, DEFAULT_CREATOR_NOTES);
        let store = &self.ctx.store;
        let api = &self.api;
        let mut seen = HashSet::new();
        for input in &inputs {
            let uid = parse_creator_uid(input)?;
            let info = api
                .call(
                    cancel,
                    "/api/container/getIndex",
                    &[
                        ("jumpfrom", "weibocom".to_string()),
                        ("type", "uid".to_string()),
                        ("value", uid.canonical.clone()),
                        ("containerid", format!("100505{}", uid.canonical)),
                    ],
                )
                .await?;
            let profile = match &info["userInfo"] {
                Value::Null => &info,
                user => user,
            };
            store.save_creator_profile(cancel, &uid.note_key, profile).await?;
            info!(platform = PLATFORM, creator_id = %uid.canonical, "creator profile saved");

            let since_id = Mutex::new(String::new());
            let (uid, since_id) = (&uid, &since_id);
            scaffold::paginate(
                cancel,
                result,
                limits,
                self.ctx.config.item_pause(),
                &mut seen,
                |id: &String| sanitize_key(id),
                |_page| async move {
                    let cursor = since_id.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    let mut params = vec![("containerid", format!("107603{}", uid.canonical))];
                    if !cursor.is_empty() {
                        params.push(("since_id", cursor));
                    }
                    let data = api.call(cancel, "/api/container/getIndex", &params).await?;
                    let cards = data["cards"].as_array().cloned().unwrap_or_default();
                    if let Err(err) = store.append_creator_dynamics(cancel, &uid.note_key, &cards, |card| {
                        value_str(&card["mblog"]["id"])
                    }) {
                        warn!(creator_id = %uid.canonical, error = %err, "creator feed not recorded");
                    }
                    let next = value_str(&data["cardlistInfo"]["since_id"]);
                    let items = status_ids(&data["cards"]);
                    if next.is_empty() || next == "0" {
                        return Ok(Page::last(items));
                    }
                    *since_id.lock().unwrap_or_else(PoisonError::into_inner) = next;
                    Ok(Page::more(items))
                },
                |token, id: String| async move { self.crawl_status(&token, &ParsedId::new(id)).await },
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for WeiboRunner {
    async fn run(&self, cancel: CancellationToken, mut request: Request) -> RunOutcome {
        request.platform = PLATFORM.to_string();
        let mut result = new_result(PLATFORM, &request);
        let outcome = match request.mode {
            Mode::Detail => self.run_detail(&cancel, &request, &mut result).await,
            Mode::Search => self.run_search(&cancel, &request, &mut result).await,
            Mode::Creator => self.run_creator(&cancel, &request, &mut result).await,
        };
        scaffold::finish(&cancel, result, outcome.err())
    }
}
