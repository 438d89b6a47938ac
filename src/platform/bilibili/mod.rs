//! Bilibili runner over the public web API.
//!
//! Every endpoint answers `{code, message, data}`; a non-zero code is an API
//! error, or a risk hint when the code is the anti-crawl block or the message
//! carries a marker.

mod comments;
mod media;
mod parse;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use self::comments::CommentLimits;
use self::parse::{VideoId, video_id};
use super::ids::invalid_id;
use super::scaffold::{
    self, Page, download_media, effective_limits, endpoint, media_headers, new_result,
    resolve_inputs, resolve_keywords, save_comments, value_i64, value_str,
};
use super::{Runner, RunnerContext};
use crate::crawler::{
    CrawlResult, CrawlerError, Mode, Request, RiskHint, RunOutcome, detect_risk_hint,
    for_each_limit_paced,
};
use crate::fetch::FetchClient;

pub use self::parse::{parse_creator_mid, parse_video_id};

/// Production API host.
pub const BILIBILI_API_BASE: &str = "https://api.bilibili.com";

const PLATFORM: &str = "bilibili";
const WEB_BASE: &str = "https://www.bilibili.com";
const DEFAULT_SEARCH_NOTES: usize = 20;
const DEFAULT_CREATOR_NOTES: usize = 50;
const CREATOR_PAGE_SIZE: i64 = 30;
/// Code returned when a request is blocked by anti-crawl checks.
const RISK_CONTROL_CODE: i64 = -412;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

/// API host plus the client requests go through.
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

    /// GETs `path` and unwraps the envelope's `data`.
    async fn call(
        &self,
        cancel: &CancellationToken,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, CrawlerError> {
        let url = endpoint(PLATFORM, &self.base, path, params)?;
        let envelope: Envelope = self.fetch.get_json_value(cancel, &url).await?;
        if envelope.code == 0 {
            return Ok(envelope.data);
        }
        if let Some(hint) = detect_risk_hint(&envelope.message) {
            return Err(CrawlerError::risk_hint(PLATFORM, url, hint));
        }
        if envelope.code == RISK_CONTROL_CODE {
            return Err(CrawlerError::risk_hint(PLATFORM, url, RiskHint::Forbidden));
        }
        Err(CrawlerError::api(
            PLATFORM,
            format!("{path}: code={} message={}", envelope.code, envelope.message),
        ))
    }
}

/// Videos by id, keyword search or creator upload list.
#[derive(Debug)]
pub struct BilibiliRunner {
    ctx: RunnerContext,
    api: Api,
}

impl BilibiliRunner {
    #[must_use]
    pub fn new(ctx: RunnerContext) -> Self {
        Self::with_base_url(ctx, BILIBILI_API_BASE)
    }

    /// Runner against another API host (tests point this at a mock server).
    #[must_use]
    pub fn with_base_url(ctx: RunnerContext, base: &str) -> Self {
        let fetch = ctx
            .fetch
            .for_platform(PLATFORM)
            .with_referer(&format!("{WEB_BASE}/"));
        Self {
            api: Api {
                fetch,
                base: base.trim_end_matches('/').to_string(),
            },
            ctx,
        }
    }

    fn comment_limits(&self) -> CommentLimits {
        CommentLimits {
            max: self.ctx.config.crawler_max_comments_count_singlenotes,
            sub_comments: self.ctx.config.enable_get_sub_comments,
        }
    }

    /// Fetches, stores and enriches one video. Comment and media failures
    /// are logged and do not fail the item.
    #[instrument(skip(self, cancel), fields(platform = PLATFORM))]
    async fn crawl_video(&self, cancel: &CancellationToken, id: &VideoId) -> Result<(), CrawlerError> {
        let parsed = id.parsed();
        let referer = format!("{WEB_BASE}/video/{}", parsed.canonical);
        let api = self.api.with_referer(&referer);
        let view = api
            .call(cancel, "/x/web-interface/view", &[id.query()])
            .await?;
        let store = &self.ctx.store;
        store.save_note_detail(cancel, &parsed.note_key, &view).await?;

        let config = &self.ctx.config;
        if config.enable_get_comments {
            let aid = value_i64(&view["aid"]);
            if aid > 0 {
                match comments::fetch_comments(&api, cancel, aid, &parsed.note_key, self.comment_limits()).await {
                    Ok(list) => {
                        save_comments(store, cancel, &parsed.note_key, &list).await;
                    }
                    Err(err) => warn!(note_id = %parsed.note_key, error = %err, "comments unavailable"),
                }
            }
        }
        if config.enable_get_medias {
            let items = media::collect(&api, cancel, &view, &parsed.note_key).await;
            let headers = media_headers(&referer, &config.cookies);
            download_media(store, config, cancel, &parsed.note_key, &items, &headers).await;
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
                let id = video_id(&input).ok_or_else(|| invalid_id(PLATFORM, &input, "video id"))?;
                self.crawl_video(&token, &id).await
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
        let search_type = match self.ctx.config.bili_search_mode.trim() {
            "" => "video",
            mode => mode,
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
                |id: &VideoId| id.parsed().note_key,
                |page| async move {
                    let data = api
                        .call(
                            cancel,
                            "/x/web-interface/search/type",
                            &[
                                ("search_type", search_type.to_string()),
                                ("keyword", keyword.clone()),
                                ("page", page.to_string()),
                            ],
                        )
                        .await?;
                    let items: Vec<VideoId> = data["result"]
                        .as_array()
                        .map(|list| list.iter().filter_map(listing_video).collect())
                        .unwrap_or_default();
                    let pages = value_i64(&data["numPages"]);
                    Ok(if pages > 0 && i64::from(page) >= pages {
                        Page::last(items)
                    } else {
                        Page::more(items)
                    })
                },
                |token, id| async move { self.crawl_video(&token, &id).await },
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
            let mid = parse_creator_mid(input)?;
            let info = api
                .call(cancel, "/x/space/acc/info", &[("mid", mid.canonical.clone())])
                .await?;
            store.save_creator_profile(cancel, &mid.note_key, &info).await?;
            info!(platform = PLATFORM, creator_id = %mid.canonical, "creator profile saved");

            let mid = &mid;
            scaffold::paginate(
                cancel,
                result,
                limits,
                self.ctx.config.item_pause(),
                &mut seen,
                |id: &VideoId| id.parsed().note_key,
                |page| async move {
                    let data = api
                        .call(
                            cancel,
                            "/x/space/arc/search",
                            &[
                                ("mid", mid.canonical.clone()),
                                ("pn", page.to_string()),
                                ("ps", CREATOR_PAGE_SIZE.to_string()),
                            ],
                        )
                        .await?;
                    let vlist = data["list"]["vlist"].as_array().cloned().unwrap_or_default();
                    if let Err(err) = store.append_creator_dynamics(cancel, &mid.note_key, &vlist, |v| {
                        value_str(&v["bvid"])
                    }) {
                        warn!(creator_id = %mid.canonical, error = %err, "creator videos not recorded");
                    }
                    let items: Vec<VideoId> = vlist.iter().filter_map(listing_video).collect();
                    let count = value_i64(&data["page"]["count"]);
                    Ok(if count > 0 && i64::from(page) * CREATOR_PAGE_SIZE >= count {
                        Page::last(items)
                    } else {
                        Page::more(items)
                    })
                },
                |token, id| async move { self.crawl_video(&token, &id).await },
            )
            .await?;
        }
        Ok(())
    }
}

/// Video id of a search hit or upload list entry.
fn listing_video(entry: &Value) -> Option<VideoId> {
    let bvid = value_str(&entry["bvid"]);
    if !bvid.is_empty() {
        return video_id(&bvid);
    }
    u64::try_from(value_i64(&entry["aid"]))
        .ok()
        .filter(|aid| *aid > 0)
        .map(VideoId::Aid)
}

#[async_trait]
impl Runner for BilibiliRunner {
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
