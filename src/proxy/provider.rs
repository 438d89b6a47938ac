//! Proxy providers.
//!
//! Vendor APIs (kuaidaili, wandouhttp, jisuhttp) are recognized by name but
//! not implemented; configure a static list or file instead.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Proxy, ProxyError};

const VENDOR_PROVIDERS: &[&str] = &["kuaidaili", "wandouhttp", "jisuhttp"];

/// Source of proxy leases.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Fetches up to `count` leases.
    async fn get_proxies(
        &self,
        cancel: &CancellationToken,
        count: usize,
    ) -> Result<Vec<Proxy>, ProxyError>;
}

/// Provider over a fixed list, handing entries out round-robin.
#[derive(Debug)]
pub struct StaticProvider {
    entries: Vec<Proxy>,
    cursor: AtomicUsize,
}

impl StaticProvider {
    /// Creates a provider over `entries`.
    #[must_use]
    pub fn new(entries: Vec<Proxy>) -> Self {
        Self {
            entries,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Parses a list string (entries separated by `,`, `;` or newlines).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidEntry`] on the first malformed entry.
    pub fn from_list(list: &str) -> Result<Self, ProxyError> {
        Ok(Self::new(parse_proxy_list(list)?))
    }

    /// Number of configured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ProxyProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn get_proxies(
        &self,
        cancel: &CancellationToken,
        count: usize,
    ) -> Result<Vec<Proxy>, ProxyError> {
        if cancel.is_cancelled() {
            return Err(ProxyError::Canceled);
        }
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let count = count.max(1).min(self.entries.len());
        let start = self.cursor.fetch_add(count, Ordering::Relaxed);
        let out = (0..count)
            .map(|i| self.entries[(start + i) % self.entries.len()].clone())
            .collect();
        debug!(count, "static provider handed out proxies");
        Ok(out)
    }
}

/// Builds the provider named in config.
///
/// A non-empty list or file always selects the static provider.
///
/// # Errors
///
/// Returns [`ProxyError::UnsupportedProvider`] for vendor or unknown names,
/// and parse/read errors for static sources.
pub fn build_provider(
    name: &str,
    list: &str,
    file: &str,
) -> Result<Arc<dyn ProxyProvider>, ProxyError> {
    let name = name.trim().to_lowercase();
    let has_static_source = !list.trim().is_empty() || !file.trim().is_empty();
    if !has_static_source && !(name.is_empty() || name == "static") {
        if VENDOR_PROVIDERS.contains(&name.as_str()) {
            debug!(provider = %name, "vendor proxy provider requested without a static list");
        }
        return Err(ProxyError::UnsupportedProvider { name });
    }

    let mut entries = parse_proxy_list(list)?;
    if !file.trim().is_empty() {
        entries.extend(load_proxy_file(Path::new(file.trim()))?);
    }
    Ok(Arc::new(StaticProvider::new(entries)))
}

/// Reads proxy entries from a file.
///
/// # Errors
///
/// Returns [`ProxyError::Io`] when the file cannot be read, or a parse error.
pub fn load_proxy_file(path: &Path) -> Result<Vec<Proxy>, ProxyError> {
    let text = std::fs::read_to_string(path).map_err(|source| ProxyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_proxy_list(&text)
}

/// Parses `ip:port`, `ip:port:user:pass` and `scheme://user:pass@ip:port`
/// entries. `#` starts a comment that runs to the end of the line.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidEntry`] on the first malformed entry.
pub fn parse_proxy_list(text: &str) -> Result<Vec<Proxy>, ProxyError> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        for entry in line.split([',', ';']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            out.push(parse_proxy_entry(entry)?);
        }
    }
    Ok(out)
}

fn parse_proxy_entry(entry: &str) -> Result<Proxy, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    if entry.contains("://") {
        let url = url::Url::parse(entry).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;
        let user = urlencoding::decode(url.username())
            .map_err(|e| invalid(&e.to_string()))?
            .into_owned();
        let password = urlencoding::decode(url.password().unwrap_or_default())
            .map_err(|e| invalid(&e.to_string()))?
            .into_owned();
        let mut proxy = Proxy::new(host, port).with_auth(user, password);
        proxy.protocol = url.scheme().to_string();
        return Ok(proxy);
    }

    let parts: Vec<&str> = entry.split(':').collect();
    let (ip, port, user, password) = match parts.as_slice() {
        [ip, port] => (*ip, *port, "", ""),
        [ip, port, user, password] => (*ip, *port, *user, *password),
        _ => return Err(invalid("expected ip:port or ip:port:user:pass")),
    };
    if ip.is_empty() {
        return Err(invalid("missing host"));
    }
    let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
    Ok(Proxy::new(ip, port).with_auth(user, password))
}
