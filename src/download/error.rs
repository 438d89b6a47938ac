//! Error types for media downloads.

use std::path::PathBuf;

use thiserror::Error;

use crate::crawler::should_retry_status;

/// Errors that can occur while downloading a media file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout { url: String },

    /// Non-2xx response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus { url: String, status: u16 },

    /// The server answered a media request with a page or API error body.
    #[error("unexpected content-type for {filename}: {content_type}")]
    SuspiciousContentType {
        filename: String,
        content_type: String,
    },

    /// File system error during download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blank or unparseable URL.
    #[error("invalid URL: {url:?}")]
    InvalidUrl { url: String },

    /// Filename is blank after sanitizing.
    #[error("filename is empty")]
    EmptyFilename,

    /// `urls` and `filenames` differ in length.
    #[error("urls and filenames length mismatch ({urls} vs {filenames})")]
    LengthMismatch { urls: usize, filenames: usize },

    /// The HTTP client could not be built.
    #[error("cannot build http client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    /// The job was cancelled.
    #[error("download canceled")]
    Canceled,
}

impl DownloadError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            return Self::Timeout { url };
        }
        Self::Network { url, source }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Transport failures, timeouts and 408/429/5xx responses are retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status == 408 || should_retry_status(*status),
            _ => false,
        }
    }
}
