//! Media downloads (covers, pictures, video streams) for saved notes.
//!
//! Files land in the note's `media/` directory. Downloads stream to disk,
//! skip files already present and retry transient failures.

mod downloader;
mod error;
mod filename;

pub use downloader::{
    DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_DOWNLOAD_TIMEOUT, DOWNLOAD_JITTER, DownloadFailure,
    DownloadOutcome, DownloadSummary, DownloaderConfig, MAX_DOWNLOAD_CONCURRENCY, MediaDownloader,
};
pub use error::DownloadError;
pub use filename::{extension_from_url, is_suspicious_content_type, media_filename, sanitize_filename};
