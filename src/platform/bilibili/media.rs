//! Cover and stream URL collection for a video.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Api;
use crate::download::media_filename;
use crate::platform::scaffold::{http_url, value_i64, value_str};

fn first_url(entry: &Value) -> Option<String> {
    ["baseUrl", "base_url", "url"]
        .iter()
        .find_map(|key| http_url(&value_str(&entry[*key])))
}

/// `(url, filename)` pairs for the cover image.
pub(super) fn cover(view: &Value, note_key: &str) -> Vec<(String, String)> {
    http_url(&value_str(&view["pic"]))
        .map(|url| {
            let name = media_filename(&format!("{note_key}_cover_0"), &url, ".jpg");
            (url, name)
        })
        .into_iter()
        .collect()
}

/// `(url, filename)` pairs from a play URL payload: the progressive stream
/// when present, otherwise the first DASH video and audio tracks.
pub(super) fn streams(play: &Value, note_key: &str) -> Vec<(String, String)> {
    if let Some(url) = play["durl"].get(0).and_then(first_url) {
        return vec![(url, format!("{note_key}_video.mp4"))];
    }
    let dash = &play["dash"];
    let mut out = Vec::new();
    if let Some(url) = dash["video"].get(0).and_then(first_url) {
        out.push((url, format!("{note_key}_video.mp4")));
    }
    if let Some(url) = dash["audio"].get(0).and_then(first_url) {
        out.push((url, format!("{note_key}_audio.m4a")));
    }
    out
}

fn cid_of(view: &Value) -> i64 {
    match value_i64(&view["cid"]) {
        0 => value_i64(&view["pages"][0]["cid"]),
        cid => cid,
    }
}

/// Everything downloadable for a video. Play URL failures only drop the
/// streams.
pub(super) async fn collect(
    api: &Api,
    cancel: &CancellationToken,
    view: &Value,
    note_key: &str,
) -> Vec<(String, String)> {
    let mut media = cover(view, note_key);
    let aid = value_i64(&view["aid"]);
    let cid = cid_of(view);
    if aid <= 0 || cid <= 0 {
        return media;
    }
    let params = [
        ("avid", aid.to_string()),
        ("cid", cid.to_string()),
        ("qn", "80".to_string()),
        ("fourk", "1".to_string()),
        ("fnval", "1".to_string()),
        ("platform", "pc".to_string()),
    ];
    match api.call(cancel, "/x/player/playurl", &params).await {
        Ok(play) => media.extend(streams(&play, note_key)),
        Err(err) => warn!(note_id = %note_key, error = %err, "play url unavailable"),
    }
    media
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cover_prefixes_protocol_relative_url() {
        let view = json!({"pic": "//i0.hdslb.com/bfs/archive/a.png"});
        assert_eq!(
            cover(&view, "BV1"),
            vec![(
                "https://i0.hdslb.com/bfs/archive/a.png".to_string(),
                "BV1_cover_0.png".to_string()
            )]
        );
        assert!(cover(&json!({}), "BV1").is_empty());
    }

    #[test]
    fn test_streams_prefers_progressive() {
        let play = json!({
            "durl": [{"url": "https://upos.example/v.mp4"}],
            "dash": {"video": [{"baseUrl": "https://upos.example/d.m4s"}]}
        });
        assert_eq!(
            streams(&play, "BV1"),
            vec![("https://upos.example/v.mp4".to_string(), "BV1_video.mp4".to_string())]
        );
    }

    #[test]
    fn test_streams_falls_back_to_dash() {
        let play = json!({
            "dash": {
                "video": [{"base_url": "https://upos.example/v.m4s"}],
                "audio": [{"url": "https://upos.example/a.m4s"}]
            }
        });
        let names: Vec<_> = streams(&play, "av9").into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["av9_video.mp4", "av9_audio.m4a"]);
    }

    #[test]
    fn test_cid_from_pages() {
        assert_eq!(cid_of(&json!({"pages": [{"cid": 77}]})), 77);
        assert_eq!(cid_of(&json!({"cid": 5, "pages": [{"cid": 77}]})), 5);
    }
}
