//! Platform-agnostic HTTP facade (GET, JSON POST) with retry, proxy rotation
//! and a body cap.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, REFERER, USER_AGENT};
use reqwest::{Client, Proxy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_RETRY_COUNT, RetryPolicy};
use crate::crawler::{
    CrawlerError, RiskHint, detect_risk_hint, should_invalidate_proxy_status, should_retry_status,
    sleep, unix_now,
};
use crate::proxy::ProxyRotator;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on retained body bytes.
pub const DEFAULT_BODY_CAP: usize = 2_000_000;

/// Browser User-Agent sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const ACCEPT_JSON: &str = "application/json, text/plain, */*";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Fetch client settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Platform tag stamped into errors.
    pub platform: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub referer: String,
    /// Raw `Cookie` header value; empty sends none.
    pub cookie: String,
    /// Extra headers applied after the defaults.
    pub headers: BTreeMap<String, String>,
    pub body_cap: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            platform: String::new(),
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            user_agent: BROWSER_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            referer: String::new(),
            cookie: String::new(),
            headers: BTreeMap::new(),
            body_cap: DEFAULT_BODY_CAP,
        }
    }
}

impl FetchConfig {
    /// Default settings for a platform.
    #[must_use]
    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Self::default()
        }
    }
}

/// A completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    /// Body, decoded lossily and cut at `body_cap` bytes.
    pub body: String,
    /// Size of the full body before the cap.
    pub original_len: usize,
    pub truncated: bool,
    /// Unix seconds.
    pub fetched_at: i64,
}

impl FetchResponse {
    /// Risk marker found in the body, if any.
    #[must_use]
    pub fn risk_hint(&self) -> Option<RiskHint> {
        detect_risk_hint(&self.body)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decoder error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Default)]
struct ClientCache {
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientCache {
    /// Returns the client for a proxy URL (empty for direct), building it on
    /// first use.
    fn get(&self, proxy_url: &str) -> Result<Client, reqwest::Error> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy_url) {
            return Ok(client.clone());
        }
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .gzip(true);
        if !proxy_url.is_empty() {
            builder = builder.proxy(Proxy::all(proxy_url)?);
        }
        let client = builder.build()?;
        clients.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }
}

/// Shared HTTP facade.
///
/// Cloning is cheap; clones share the per-proxy client cache and the proxy
/// rotator.
#[derive(Clone)]
pub struct FetchClient {
    config: FetchConfig,
    policy: RetryPolicy,
    proxies: Option<Arc<dyn ProxyRotator>>,
    cache: Arc<ClientCache>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("platform", &self.config.platform)
            .field("policy", &self.policy)
            .field("proxied", &self.proxies.is_some())
            .finish_non_exhaustive()
    }
}

impl FetchClient {
    /// Creates a client without proxy rotation.
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        let policy = RetryPolicy::new(config.retry_count, config.base_delay, config.max_delay);
        Self {
            config,
            policy,
            proxies: None,
            cache: Arc::new(ClientCache::default()),
        }
    }

    /// Routes requests through the rotator's current lease.
    #[must_use]
    pub fn with_proxies(mut self, proxies: Arc<dyn ProxyRotator>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// Clone with a different platform tag.
    #[must_use]
    pub fn for_platform(&self, platform: &str) -> Self {
        let mut next = self.clone();
        next.config.platform = platform.to_string();
        next
    }

    /// Clone with a different Referer.
    #[must_use]
    pub fn with_referer(&self, referer: &str) -> Self {
        let mut next = self.clone();
        next.config.referer = referer.to_string();
        next
    }

    /// Clone with an extra header.
    #[must_use]
    pub fn with_header(&self, name: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.config.headers.insert(name.to_string(), value.to_string());
        next
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET expecting JSON.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_json(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<FetchResponse, CrawlerError> {
        self.get(cancel, url, ACCEPT_JSON).await
    }

    /// GET expecting HTML.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_html(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<FetchResponse, CrawlerError> {
        self.get(cancel, url, ACCEPT_HTML).await
    }

    /// GET expecting JSON, decoded into `T`.
    ///
    /// A body that fails to decode but carries a risk marker is reported as
    /// a risk hint rather than a decode error.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get), plus [`CrawlerError::Decode`].
    pub async fn get_json_value<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> Result<T, CrawlerError> {
        let response = self.get_json(cancel, url).await?;
        response.json().map_err(|e| match response.risk_hint() {
            Some(hint) => CrawlerError::risk_hint(&self.config.platform, url, hint),
            None => CrawlerError::decode(&self.config.platform, url, e),
        })
    }

    /// POST of a JSON body expecting JSON, decoded into `T`. Retried and
    /// decoded like [`get_json_value`](Self::get_json_value).
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get), plus [`CrawlerError::Decode`].
    pub async fn post_json_value<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, CrawlerError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| CrawlerError::decode(&self.config.platform, url, e))?;
        let response = self.send(cancel, url, ACCEPT_JSON, Some(&payload)).await?;
        response.json().map_err(|e| match response.risk_hint() {
            Some(hint) => CrawlerError::risk_hint(&self.config.platform, url, hint),
            None => CrawlerError::decode(&self.config.platform, url, e),
        })
    }

    /// GET with retry.
    ///
    /// Makes up to `retry_count + 1` attempts. 429 and 5xx are retried, as
    /// are 401/403 when a proxy rotator is attached; 401/403/429 invalidate
    /// the current lease every time they are seen. Transport errors are
    /// retried unless the token fired.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::Canceled`] when the token fires,
    /// [`CrawlerError::HttpStatus`] for a non-2xx final response,
    /// [`CrawlerError::Timeout`] / [`CrawlerError::Network`] for transport
    /// failures, or a proxy error.
    pub async fn get(
        &self,
        cancel: &CancellationToken,
        url: &str,
        accept: &str,
    ) -> Result<FetchResponse, CrawlerError> {
        self.send(cancel, url, accept, None).await
    }

    /// One request with the retry loop; a body makes it a JSON POST.
    #[instrument(skip(self, cancel, accept, body), fields(platform = %self.config.platform, post = body.is_some()))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        url: &str,
        accept: &str,
        body: Option<&[u8]>,
    ) -> Result<FetchResponse, CrawlerError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(CrawlerError::Canceled);
            }

            let failure = match self.attempt(cancel, url, accept, body).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status;
                    if should_invalidate_proxy_status(status) {
                        self.invalidate_proxy();
                    }
                    let retryable = should_retry_status(status)
                        || (self.proxies.is_some() && matches!(status, 401 | 403));
                    let err =
                        CrawlerError::http_status(&self.config.platform, url, status, &response.body);
                    if !retryable {
                        return Err(err);
                    }
                    err
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!(attempt, error = %failure, "giving up after retries");
                return Err(failure);
            }
            let delay = self.policy.delay_for(attempt);
            debug!(attempt, delay_ms = delay.as_millis(), error = %failure, "retrying");
            if !sleep(cancel, delay).await {
                return Err(CrawlerError::Canceled);
            }
        }
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        url: &str,
        accept: &str,
        body: Option<&[u8]>,
    ) -> Result<FetchResponse, CrawlerError> {
        let proxy_url = match &self.proxies {
            Some(rotator) => rotator.current_proxy_url(cancel).await?.unwrap_or_default(),
            None => String::new(),
        };
        let client = self
            .cache
            .get(&proxy_url)
            .map_err(|e| CrawlerError::network(&self.config.platform, url, e))?;

        let request = match body {
            Some(payload) => client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(payload.to_vec()),
            None => client.get(url),
        };
        let mut request = request
            .timeout(self.config.timeout)
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, &self.config.accept_language)
            .header(USER_AGENT, &self.config.user_agent);
        if !self.config.referer.is_empty() {
            request = request.header(REFERER, &self.config.referer);
        }
        if !self.config.cookie.is_empty() {
            request = request.header(COOKIE, &self.config.cookie);
        }
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CrawlerError::Canceled),
            sent = request.send() => sent.map_err(|e| self.transport_error(url, e))?,
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let final_url = response.url().to_string();

        let (body, original_len) = self.read_capped(cancel, url, response).await?;
        let truncated = original_len > body.len();
        Ok(FetchResponse {
            url: final_url,
            status,
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
            original_len,
            truncated,
            fetched_at: unix_now(),
        })
    }

    async fn read_capped(
        &self,
        cancel: &CancellationToken,
        url: &str,
        response: reqwest::Response,
    ) -> Result<(Vec<u8>, usize), CrawlerError> {
        let cap = self.config.body_cap;
        let mut kept = Vec::new();
        let mut total = 0usize;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CrawlerError::Canceled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| self.transport_error(url, e))?;
            total += chunk.len();
            if kept.len() < cap {
                let room = cap - kept.len();
                kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
        }
        Ok((kept, total))
    }

    fn transport_error(&self, url: &str, err: reqwest::Error) -> CrawlerError {
        if err.is_timeout() {
            CrawlerError::Timeout {
                url: url.to_string(),
            }
        } else {
            CrawlerError::network(&self.config.platform, url, err)
        }
    }

    fn invalidate_proxy(&self) {
        if let Some(rotator) = &self.proxies {
            rotator.invalidate_current();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::crawler::ErrorKind;

    fn quick_config() -> FetchConfig {
        FetchConfig {
            platform: "test".into(),
            retry_count: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            ..FetchConfig::default()
        }
    }

    // ==================== Response Tests ====================

    #[tokio::test]
    async fn test_get_json_success_sends_default_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("cookie", "a=1"))
            .and(header("referer", "https://example.test/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"{\"ok\":true}".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let client = FetchClient::new(FetchConfig {
            cookie: "a=1".into(),
            ..quick_config()
        })
        .with_referer("https://example.test/");
        let token = CancellationToken::new();
        let response = client
            .get_json(&token, &format!("{}/ok", server.uri()))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json");
        assert!(!response.truncated);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_post_json_value_sends_body_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"query": "q"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"n": 1}})))
            .mount(&server)
            .await;

        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        let value: serde_json::Value = client
            .post_json_value(
                &token,
                &format!("{}/graphql", server.uri()),
                &serde_json::json!({"query": "q"}),
            )
            .await
            .unwrap();
        assert_eq!(value["data"]["n"], 1);
    }

    #[tokio::test]
    async fn test_body_cap_sets_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let client = FetchClient::new(FetchConfig {
            body_cap: 10,
            ..quick_config()
        });
        let token = CancellationToken::new();
        let response = client.get_html(&token, &server.uri()).await.unwrap();
        assert_eq!(response.body.len(), 10);
        assert_eq!(response.original_len, 100);
        assert!(response.truncated);
    }

    // ==================== Retry Tests ====================

    #[tokio::test]
    async fn test_404_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        let err = client.get_json(&token, &server.uri()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Http);
        assert_eq!(err.http_status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_5xx_exhausts_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        let err = client.get_json(&token, &server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("http status=503 body=busy"));
    }

    #[tokio::test]
    async fn test_403_without_proxy_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        let err = client.get_json(&token, &server.uri()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .get_json(&token, "http://127.0.0.1:9/never")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
    }

    #[tokio::test]
    async fn test_json_decode_error_with_risk_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>请通过验证</html>"))
            .mount(&server)
            .await;

        let client = FetchClient::new(quick_config());
        let token = CancellationToken::new();
        let err = client
            .get_json_value::<serde_json::Value>(&token, &server.uri())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RiskHint);
    }
}
