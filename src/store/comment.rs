use serde::{Deserialize, Serialize};

/// Comment projection shared by every site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedComment {
    pub platform: String,
    pub note_id: String,
    pub comment_id: String,
    #[serde(default)]
    pub parent_comment_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_sec_uid: String,
    #[serde(default)]
    pub user_nickname: String,
}

impl UnifiedComment {
    /// Column order of CSV and xlsx comment outputs.
    pub const HEADER: [&'static str; 10] = [
        "platform",
        "note_id",
        "comment_id",
        "parent_comment_id",
        "content",
        "create_time",
        "like_count",
        "user_id",
        "user_sec_uid",
        "user_nickname",
    ];

    #[must_use]
    pub fn key(&self) -> String {
        self.comment_id.clone()
    }

    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.platform.clone(),
            self.note_id.clone(),
            self.comment_id.clone(),
            self.parent_comment_id.clone(),
            self.content.clone(),
            self.create_time.to_string(),
            self.like_count.to_string(),
            self.user_id.clone(),
            self.user_sec_uid.clone(),
            self.user_nickname.clone(),
        ]
    }

    #[must_use]
    pub fn header() -> Vec<String> {
        Self::HEADER.iter().map(|h| (*h).to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_matches_header_width() {
        let comment = UnifiedComment {
            platform: "weibo".into(),
            comment_id: "c1".into(),
            like_count: 7,
            ..UnifiedComment::default()
        };
        let row = comment.to_row();
        assert_eq!(row.len(), UnifiedComment::HEADER.len());
        assert_eq!(row[2], "c1");
        assert_eq!(row[6], "7");
    }
}
