//! Comment collection shared by the page sites.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use scraper::Html;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::crawler::{CrawlerError, sleep};
use crate::fetch::FetchClient;
use crate::platform::scaffold::value_str;
use crate::store::UnifiedComment;

#[allow(clippy::expect_used)]
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>").expect("line break regex is valid") // Static pattern, safe to panic
});

static NULL: Value = Value::Null;

/// Where a site sends its comment requests.
#[derive(Debug, Clone, Copy)]
pub struct CommentSource<'a> {
    pub fetch: &'a FetchClient,
    pub cancel: &'a CancellationToken,
    /// Site origin without a trailing slash.
    pub base: &'a str,
    /// Pause between comment pages.
    pub pause: Duration,
}

impl CommentSource<'_> {
    /// Waits out the page pause.
    ///
    /// # Errors
    /// [`CrawlerError::Canceled`] when the token fires first.
    pub async fn between_pages(&self) -> Result<(), CrawlerError> {
        if sleep(self.cancel, self.pause).await {
            Ok(())
        } else {
            Err(CrawlerError::Canceled)
        }
    }
}

/// Comments gathered for one note.
///
/// Each id is kept once; every comment is stamped with the platform and
/// note key. `max` of 0 means no cap.
#[derive(Debug)]
pub struct CommentCollector {
    platform: &'static str,
    note_key: String,
    max: usize,
    sub_comments: bool,
    seen: HashSet<String>,
    comments: Vec<UnifiedComment>,
}

impl CommentCollector {
    #[must_use]
    pub fn new(platform: &'static str, note_key: &str, max: usize, sub_comments: bool) -> Self {
        Self {
            platform,
            note_key: note_key.to_string(),
            max,
            sub_comments,
            seen: HashSet::new(),
            comments: Vec::new(),
        }
    }

    /// Whether replies to comments are wanted.
    #[must_use]
    pub fn sub_comments(&self) -> bool {
        self.sub_comments
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.max > 0 && self.comments.len() >= self.max
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Adds `comment` unless its id is blank or already seen, or the cap is
    /// reached. Returns whether it was added.
    pub fn push(&mut self, mut comment: UnifiedComment) -> bool {
        if self.is_full() {
            return false;
        }
        let id = comment.comment_id.trim().to_string();
        if id.is_empty() || !self.seen.insert(id.clone()) {
            return false;
        }
        comment.comment_id = id;
        comment.platform = self.platform.to_string();
        comment.note_id.clone_from(&self.note_key);
        self.comments.push(comment);
        true
    }

    #[must_use]
    pub fn into_comments(self) -> Vec<UnifiedComment> {
        self.comments
    }
}

/// Text of an HTML fragment with `<br>` kept as newlines.
#[must_use]
pub fn html_text(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return fragment.trim().to_string();
    }
    let fragment = LINE_BREAK.replace_all(fragment, "\n");
    Html::parse_fragment(&fragment)
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// First non-null of `keys` in `value`.
#[must_use]
pub fn pick<'v>(value: &'v Value, keys: &[&str]) -> &'v Value {
    keys.iter()
        .map(|key| &value[*key])
        .find(|v| !v.is_null())
        .unwrap_or(&NULL)
}

/// Id string of a JSON value; `0` counts as absent.
#[must_use]
pub fn id_str(value: &Value) -> String {
    let id = value_str(value);
    if id == "0" { String::new() } else { id }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn comment(id: &str) -> UnifiedComment {
        UnifiedComment {
            comment_id: id.to_string(),
            content: "hi".into(),
            ..UnifiedComment::default()
        }
    }

    #[test]
    fn test_collector_stamps_dedups_and_caps() {
        let mut comments = CommentCollector::new("tieba", "42", 2, true);
        assert!(comments.push(comment(" 1 ")));
        assert!(!comments.push(comment("1")));
        assert!(!comments.push(comment("  ")));
        assert!(comments.push(comment("2")));
        assert!(comments.is_full());
        assert!(!comments.push(comment("3")));

        let comments = comments.into_comments();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].comment_id, "1");
        assert_eq!(comments[0].platform, "tieba");
        assert_eq!(comments[1].note_id, "42");
    }

    #[test]
    fn test_collector_without_cap() {
        let mut comments = CommentCollector::new("zhihu", "1", 0, false);
        for id in 0..50 {
            assert!(comments.push(comment(&format!("c{id}"))));
        }
        assert!(!comments.is_full());
        assert_eq!(comments.len(), 50);
    }

    #[test]
    fn test_html_text_keeps_breaks() {
        assert_eq!(html_text("<p>one<br/>two &amp; <b>three</b></p>"), "one\ntwo & three");
        assert_eq!(html_text("  plain  "), "plain");
    }

    #[test]
    fn test_pick_and_id_str() {
        let value = json!({"a": null, "b": 7, "c": "x", "z": 0});
        assert_eq!(pick(&value, &["a", "b", "c"]), &json!(7));
        assert!(pick(&value, &["missing"]).is_null());
        assert_eq!(id_str(&value["z"]), "");
        assert_eq!(id_str(&value["c"]), "x");
    }
}
