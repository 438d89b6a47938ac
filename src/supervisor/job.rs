//! The default job body: wire store, proxies and fetch client, then run the
//! platform's runner.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::crawler::{CrawlResult, CrawlerError, RunOutcome};
use crate::fetch::FetchClient;
use crate::platform::{Registry, Runner, RunnerContext};
use crate::proxy::{DEFAULT_EXPIRY_BUFFER, ProxyPool, build_provider};
use crate::store::Store;

/// Runs one job to completion.
///
/// Store, proxy and registry failures end the job before the runner starts
/// and come back as the outcome's error.
#[instrument(skip_all, fields(platform = %config.platform, mode = %config.crawler_type))]
pub async fn execute(cancel: CancellationToken, config: Config, registry: Arc<Registry>) -> RunOutcome {
    let request = config.request();
    match prepare(&config, &registry).await {
        Ok(runner) => {
            info!(inputs = request.inputs.len(), keywords = request.keywords.len(), "job started");
            runner.run(cancel, request).await
        }
        Err(err) => {
            let mut result = CrawlResult::start(&request);
            result.finish();
            RunOutcome::failed(result, err)
        }
    }
}

async fn prepare(config: &Config, registry: &Registry) -> Result<Box<dyn Runner>, CrawlerError> {
    let options = config.store_options()?;
    let store = Arc::new(Store::open(&options).await?);

    let mut fetch = FetchClient::new(config.fetch_config());
    if config.enable_ip_proxy {
        let provider = build_provider(
            &config.ip_proxy_provider_name,
            &config.ip_proxy_list,
            &config.ip_proxy_file,
        )?;
        debug!(provider = provider.name(), count = config.ip_proxy_pool_count, "proxy pool enabled");
        let pool = ProxyPool::new(provider, config.ip_proxy_pool_count, DEFAULT_EXPIRY_BUFFER);
        fetch = fetch.with_proxies(Arc::new(pool));
    }

    let ctx = RunnerContext::new(Arc::new(config.clone()), store, fetch);
    registry
        .create(&config.platform, ctx)
        .map_err(|e| CrawlerError::setup(e.to_string()))
}
