//! Picture, cover and video URL collection for a status.

use serde_json::Value;

use crate::download::media_filename;
use crate::platform::scaffold::{http_url, value_str};

const VIDEO_KEYS: [&str; 3] = ["mp4_720p_mp4", "mp4_hd_mp4", "mp4_ld_mp4"];

fn url_of(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => http_url(raw),
        Value::Object(_) => http_url(&value_str(&value["url"])),
        _ => None,
    }
}

fn picture_url(pic: &Value) -> Option<String> {
    url_of(&pic["large"])
        .or_else(|| url_of(&pic["url"]))
        .or_else(|| url_of(&pic["pic_big"]))
        .or_else(|| url_of(&pic["pic_large"]))
}

fn video_url(page_info: &Value) -> Option<String> {
    let media_info = &page_info["media_info"];
    url_of(&media_info["stream_url_hd"])
        .or_else(|| url_of(&media_info["stream_url"]))
        .or_else(|| VIDEO_KEYS.iter().find_map(|key| url_of(&page_info["urls"][*key])))
        .or_else(|| {
            page_info["urls"].as_object().and_then(|urls| {
                urls.iter()
                    .filter(|(key, _)| key.starts_with("mp4_"))
                    .find_map(|(_, value)| url_of(value))
            })
        })
}

/// `(url, filename)` pairs for everything downloadable in a status.
pub(super) fn collect(status: &Value, note_key: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let pics = status["pics"].as_array().into_iter().flatten();
    for (index, url) in pics.filter_map(picture_url).enumerate() {
        let name = media_filename(&format!("{note_key}_{index}"), &url, ".jpg");
        out.push((url, name));
    }
    let page_info = &status["page_info"];
    if let Some(url) = url_of(&page_info["page_pic"]).or_else(|| url_of(&page_info["pic"])) {
        let name = media_filename(&format!("{note_key}_cover_0"), &url, ".jpg");
        out.push((url, name));
    }
    if let Some(url) = video_url(page_info) {
        out.push((url, format!("{note_key}_video.mp4")));
    }
    out
}
