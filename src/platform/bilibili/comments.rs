//! Reply thread paging and projection.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Api, PLATFORM};
use crate::crawler::CrawlerError;
use crate::platform::scaffold::{value_i64, value_str};
use crate::store::UnifiedComment;

const PAGE_SIZE: &str = "20";

/// Limits for one note's comment crawl.
#[derive(Debug, Clone, Copy)]
pub(super) struct CommentLimits {
    /// Total comments kept (0 = no cap).
    pub max: usize,
    pub sub_comments: bool,
}

impl CommentLimits {
    fn full(&self, collected: usize) -> bool {
        self.max > 0 && collected >= self.max
    }
}

pub(super) fn project(note_key: &str, reply: &Value, parent: &str) -> UnifiedComment {
    UnifiedComment {
        platform: PLATFORM.to_string(),
        note_id: note_key.to_string(),
        comment_id: value_str(&reply["rpid"]),
        parent_comment_id: parent.to_string(),
        content: value_str(&reply["content"]["message"]),
        create_time: value_i64(&reply["ctime"]),
        like_count: value_i64(&reply["like"]),
        user_id: value_str(&reply["member"]["mid"]),
        user_nickname: value_str(&reply["member"]["uname"]),
        ..UnifiedComment::default()
    }
}

fn replies(data: &Value) -> &[Value] {
    data["replies"].as_array().map_or(&[][..], Vec::as_slice)
}

/// Top-level replies of a video, followed page by page, with sub-replies
/// when enabled.
pub(super) async fn fetch_comments(
    api: &Api,
    cancel: &CancellationToken,
    aid: i64,
    note_key: &str,
    limits: CommentLimits,
) -> Result<Vec<UnifiedComment>, CrawlerError> {
    let mut out = Vec::new();
    let mut page: i64 = 1;
    loop {
        let data = api
            .call(
                cancel,
                "/x/v2/reply/main",
                &[
                    ("type", "1".to_string()),
                    ("oid", aid.to_string()),
                    ("pn", page.to_string()),
                    ("ps", PAGE_SIZE.to_string()),
                    ("sort", "0".to_string()),
                ],
            )
            .await?;
        let batch = replies(&data);
        if batch.is_empty() {
            break;
        }
        for reply in batch {
            if limits.full(out.len()) {
                return Ok(out);
            }
            out.push(project(note_key, reply, ""));
            if limits.sub_comments && value_i64(&reply["rcount"]) > 0 {
                let root = value_str(&reply["rpid"]);
                fetch_sub_comments(api, cancel, aid, &root, note_key, limits, &mut out).await?;
            }
        }
        let cursor = &data["cursor"];
        if cursor["is_end"].as_bool().unwrap_or(false) {
            break;
        }
        let next = value_i64(&cursor["next"]);
        page = if next > page { next } else { page + 1 };
    }
    debug!(note_id = %note_key, count = out.len(), "comments fetched");
    Ok(out)
}

async fn fetch_sub_comments(
    api: &Api,
    cancel: &CancellationToken,
    aid: i64,
    root: &str,
    note_key: &str,
    limits: CommentLimits,
    out: &mut Vec<UnifiedComment>,
) -> Result<(), CrawlerError> {
    let mut page = 1;
    loop {
        let data = api
            .call(
                cancel,
                "/x/v2/reply/reply",
                &[
                    ("type", "1".to_string()),
                    ("oid", aid.to_string()),
                    ("root", root.to_string()),
                    ("pn", page.to_string()),
                    ("ps", PAGE_SIZE.to_string()),
                ],
            )
            .await?;
        let batch = replies(&data);
        if batch.is_empty() {
            return Ok(());
        }
        for reply in batch {
            if limits.full(out.len()) {
                return Ok(());
            }
            out.push(project(note_key, reply, root));
        }
        let total = value_i64(&data["page"]["count"]);
        let fetched = page * 20;
        if total > 0 && fetched >= total {
            return Ok(());
        }
        page += 1;
    }
}
