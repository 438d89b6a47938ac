//! Runner context builders for unit tests.
#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;

use super::RunnerContext;
use crate::config::Config;
use crate::fetch::FetchClient;
use crate::store::Store;

/// Config for `platform` with no pauses, no retries and no enrichment.
pub(crate) fn quiet_config(platform: &str) -> Config {
    Config {
        platform: platform.to_string(),
        crawler_max_sleep_sec: 0,
        http_retry_count: 0,
        http_retry_base_delay_ms: 0,
        http_retry_max_delay_ms: 0,
        enable_get_comments: false,
        enable_get_sub_comments: false,
        enable_get_medias: false,
        ..Config::default()
    }
}

/// Context with a file store rooted at `dir`.
pub(crate) async fn context(dir: &Path, mut config: Config) -> RunnerContext {
    config.data_dir = dir.display().to_string();
    let options = config.store_options().unwrap();
    let store = Store::open(&options).await.unwrap();
    let fetch = FetchClient::new(config.fetch_config());
    RunnerContext::new(Arc::new(config), Arc::new(store), fetch)
}
