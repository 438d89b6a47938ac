//! Entity key helpers shared by the site runners.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::crawler::CrawlerError;

/// Longest key kept verbatim; longer keys fall back to a digest.
pub const MAX_KEY_LEN: usize = 64;

#[allow(clippy::expect_used)]
static UNSAFE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9._-]+").expect("key sanitizer regex is valid") // Static pattern, safe to panic
});

/// A site id resolved from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// Site-native id used to build request URLs.
    pub canonical: String,
    /// Filesystem-safe key the note is stored under.
    pub note_key: String,
}

impl ParsedId {
    /// Id whose canonical form is also a safe key.
    #[must_use]
    pub fn new(canonical: impl Into<String>) -> Self {
        let canonical = canonical.into();
        let note_key = sanitize_key(&canonical);
        Self {
            canonical,
            note_key,
        }
    }

    /// Id with a separately derived key.
    #[must_use]
    pub fn with_key(canonical: impl Into<String>, note_key: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            note_key: note_key.into(),
        }
    }
}

/// Makes an id safe to use as a directory name.
///
/// Runs of characters outside `[A-Za-z0-9._-]` become `_` and surrounding
/// underscores are trimmed. Empty results, dot-only results and keys longer
/// than [`MAX_KEY_LEN`] fall back to [`hash_key`].
#[must_use]
pub fn sanitize_key(input: &str) -> String {
    let replaced = UNSAFE_RUN.replace_all(input.trim(), "_");
    let key = replaced.trim_matches('_');
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.chars().all(|c| c == '.') {
        return hash_key(input);
    }
    key.to_string()
}

/// SHA-256 hex digest of the trimmed input.
#[must_use]
pub fn hash_key(input: &str) -> String {
    hex::encode(Sha256::digest(input.trim().as_bytes()))
}

/// Invalid input error naming the digest key the input maps to.
#[must_use]
pub fn invalid_id(platform: &str, input: &str, what: &str) -> CrawlerError {
    CrawlerError::invalid_input(
        platform,
        input,
        format!("cannot parse {what} (fallback key {})", hash_key(input)),
    )
}

/// True for `http://` and `https://` inputs.
#[must_use]
pub fn looks_like_url(input: &str) -> bool {
    let s = input.trim();
    s.starts_with("http://") || s.starts_with("https://")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key_replaces_runs() {
        assert_eq!(sanitize_key("BV1xx411c7mD"), "BV1xx411c7mD");
        assert_eq!(sanitize_key("123 / 456"), "123_456");
        assert_eq!(sanitize_key("/p/42/"), "p_42");
    }

    #[test]
    fn test_sanitize_key_falls_back_to_digest() {
        let long = "a".repeat(MAX_KEY_LEN + 1);
        assert_eq!(sanitize_key(&long), hash_key(&long));
        assert_eq!(sanitize_key("///"), hash_key("///"));
        assert_eq!(sanitize_key(".."), hash_key(".."));
        assert_eq!(hash_key("x").len(), 64);
    }

    #[test]
    fn test_invalid_id_is_invalid_input() {
        let err = invalid_id("tieba", "???", "thread id");
        assert_eq!(err.kind(), crate::crawler::ErrorKind::InvalidInput);
        assert!(err.to_string().contains(&hash_key("???")));
    }
}
