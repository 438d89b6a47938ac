//! Proxy lease value and proxy errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawler::unix_now;

/// Errors produced by proxy providers and the pool.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The provider returned no usable lease.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// Acquisition was interrupted by the job's token.
    #[error("proxy acquisition canceled")]
    Canceled,

    /// The named provider has no implementation in this build.
    #[error("unsupported proxy provider: {name}")]
    UnsupportedProvider {
        /// Provider name from config.
        name: String,
    },

    /// A proxy entry could not be parsed.
    #[error("invalid proxy entry {entry:?}: {reason}")]
    InvalidEntry {
        /// Raw entry text.
        entry: String,
        /// Parse failure.
        reason: String,
    },

    /// The proxy list file could not be read.
    #[error("cannot read proxy file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A proxy lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Scheme used to reach the proxy (`http` by default).
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Unix seconds after which the lease is dead; `None` never expires.
    #[serde(default)]
    pub expired_at: Option<i64>,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl Proxy {
    /// Creates a lease without credentials or expiry.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            user: String::new(),
            password: String::new(),
            protocol: default_protocol(),
            expired_at: None,
        }
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Sets the expiry in unix seconds.
    #[must_use]
    pub fn with_expiry(mut self, expired_at: i64) -> Self {
        self.expired_at = Some(expired_at);
        self
    }

    /// Whether `now + buffer >= expired_at`.
    #[must_use]
    pub fn is_expired(&self, buffer: Duration) -> bool {
        self.is_expired_at(unix_now(), buffer)
    }

    pub(crate) fn is_expired_at(&self, now: i64, buffer: Duration) -> bool {
        let Some(expiry) = self.expired_at else {
            return false;
        };
        let buffer = i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX);
        now.saturating_add(buffer) >= expiry
    }

    /// Proxy URL with percent-encoded credentials.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.protocol.is_empty() {
            "http"
        } else {
            self.protocol.as_str()
        };
        if self.user.is_empty() {
            return format!("{scheme}://{}:{}", self.ip, self.port);
        }
        format!(
            "{scheme}://{}:{}@{}:{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.ip,
            self.port
        )
    }
}
