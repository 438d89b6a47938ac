//! Filename sanitizing and media naming helpers.

use std::path::{Component, Path};

use url::Url;

/// Extensions treated as binary media; an HTML or JSON body for one of
/// these is an error page, not the file.
const MEDIA_EXTENSIONS: [&str; 8] = [".mp4", ".m4a", ".jpg", ".jpeg", ".png", ".gif", ".webp", ".flv"];

/// Sanitizes a filename for filesystem safety.
///
/// Keeps only the last path segment, replaces characters invalid on common
/// filesystems (`/ \ : * ? " < > |` and control characters) with `_`, and
/// rewrites dot-only names. Returns an empty string for blank input.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let name = name.trim();
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let sanitized: String = last
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() || is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

/// Lowercased extension (with dot) of the URL's last path segment.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 6 {
        return None;
    }
    Some(ext.to_lowercase())
}

/// `<stem><ext>` where the extension comes from the URL, else `default_ext`.
#[must_use]
pub fn media_filename(stem: &str, url: &str, default_ext: &str) -> String {
    let ext = extension_from_url(url).unwrap_or_else(|| default_ext.to_string());
    sanitize_filename(&format!("{stem}{ext}"))
}

/// True when a media-named file would receive an HTML or JSON body.
#[must_use]
pub fn is_suspicious_content_type(content_type: &str, filename: &str) -> bool {
    let ext = Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if !MEDIA_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }
    let ct = content_type.trim().to_lowercase();
    ct.contains("text/html") || ct.contains("application/json")
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Sanitize Tests ====================

    #[test]
    fn test_sanitize_filename_keeps_last_segment() {
        assert_eq!(sanitize_filename("a/b/c.jpg"), "c.jpg");
        assert_eq!(sanitize_filename("..\\x.png"), "x.png");
    }

    #[test]
    fn test_sanitize_filename_replaces_invalid_chars() {
        assert_eq!(sanitize_filename("p:1*?.jpg"), "p_1__.jpg");
        assert_eq!(sanitize_filename("  "), "");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename(".."), "__");
    }

    // ==================== Naming Tests ====================

    #[test]
    fn test_media_filename_uses_url_extension() {
        assert_eq!(
            media_filename("cover", "https://i0.hdslb.com/bfs/archive/x.PNG?w=1", ".jpg"),
            "cover.png"
        );
        assert_eq!(media_filename("video", "https://cdn.test/play", ".mp4"), "video.mp4");
    }

    #[test]
    fn test_suspicious_content_type_only_for_media() {
        assert!(is_suspicious_content_type("text/html; charset=utf-8", "a.jpg"));
        assert!(is_suspicious_content_type("application/json", "v.MP4"));
        assert!(!is_suspicious_content_type("image/jpeg", "a.jpg"));
        assert!(!is_suspicious_content_type("text/html", "page.txt"));
    }
}
