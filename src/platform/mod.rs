//! Per-platform runners and the registry that constructs them.
//!
//! # Architecture
//!
//! - [`Runner`] - async trait every site implements: one [`Request`] in,
//!   one [`RunOutcome`] out
//! - [`Registry`] - name/alias table of runner factories
//! - [`RunnerContext`] - explicit config, store and fetch client handed to
//!   each runner at construction
//! - [`scaffold`] - shared plumbing (input resolution, limits, paging, result
//!   finalization)
//! - [`BilibiliRunner`], [`WeiboRunner`] - JSON API sites
//! - [`PageRunner`] - HTML sites ([`Tieba`], [`Zhihu`], [`Kuaishou`])

mod bilibili;
pub mod ids;
mod pages;
mod registry;
pub mod scaffold;
#[cfg(test)]
pub(crate) mod testutil;
mod weibo;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::crawler::{Request, RunOutcome};
use crate::fetch::FetchClient;
use crate::store::Store;

pub use bilibili::{BILIBILI_API_BASE, BilibiliRunner, parse_creator_mid, parse_video_id};
pub use pages::{Kuaishou, PageRunner, PageSite, Tieba, Zhihu};
pub use registry::{Factory, Registry, RegistryError};
pub use weibo::{WEIBO_API_BASE, WeiboRunner, parse_status_id};

/// Runs one crawl job for a platform.
///
/// # Object Safety
///
/// Uses `async_trait` so the registry can hand out `Box<dyn Runner>`.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Executes the request until done or until `cancel` fires.
    ///
    /// Per-item failures are counted in the result; the error slot carries
    /// only job-level failures (empty inputs, search page errors,
    /// cancellation).
    async fn run(&self, cancel: CancellationToken, request: Request) -> RunOutcome;
}

/// Collaborators a runner is built with.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub fetch: FetchClient,
}

impl RunnerContext {
    #[must_use]
    pub fn new(config: Arc<Config>, store: Arc<Store>, fetch: FetchClient) -> Self {
        Self {
            config,
            store,
            fetch,
        }
    }
}

/// Registry with every built-in runner.
///
/// xhs and douyin need request signing from an external collaborator and
/// are not registered.
#[must_use]
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("bilibili", &["bili", "b站", "b"], |ctx| {
        Box::new(BilibiliRunner::new(ctx))
    });
    registry.register("weibo", &["wb", "微博"], |ctx| Box::new(WeiboRunner::new(ctx)));
    registry.register("tieba", &["tb", "贴吧"], |ctx| {
        Box::new(PageRunner::<Tieba>::new(ctx))
    });
    registry.register("zhihu", &["zh", "知乎"], |ctx| {
        Box::new(PageRunner::<Zhihu>::new(ctx))
    });
    registry.register("kuaishou", &["ks", "快手"], |ctx| {
        Box::new(PageRunner::<Kuaishou>::new(ctx))
    });
    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_are_canonical() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec!["bilibili", "kuaishou", "tieba", "weibo", "zhihu"]
        );
        assert_eq!(registry.canonical("B站"), Some("bilibili"));
        assert_eq!(registry.canonical("xhs"), None);
    }
}
