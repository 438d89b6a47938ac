//! Integration tests for append-unique outputs and the per-job store.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use media_crawler_core::store::append::{append_unique_csv, append_unique_jsonl, load_index};
use media_crawler_core::store::{Backend, SaveOption, Store, StoreOptions, UnifiedComment};
use serde::Serialize;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct Item {
    id: String,
}

fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter().map(|id| Item { id: (*id).to_string() }).collect()
}

fn key_of(item: &Item) -> String {
    item.id.clone()
}

fn jsonl_keys(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("data file should exist")
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("valid json line");
            value["id"].as_str().expect("id field").to_string()
        })
        .collect()
}

fn comment(note: &str, id: &str) -> UnifiedComment {
    UnifiedComment {
        platform: "bilibili".to_string(),
        note_id: note.to_string(),
        comment_id: id.to_string(),
        content: format!("comment {id}"),
        ..UnifiedComment::default()
    }
}

async fn open_store(dir: &TempDir, save_option: SaveOption) -> Store {
    Store::open(&StoreOptions {
        data_dir: dir.path().to_path_buf(),
        platform: "bilibili".to_string(),
        mode: "detail".to_string(),
        save_option,
        backend: Backend::File,
        ..StoreOptions::default()
    })
    .await
    .expect("store should open")
}

// ==================== JSONL Tests ====================

#[test]
fn test_append_unique_jsonl_is_idempotent() {
    let dir = TempDir::new().expect("failed to create temp dir");

    let written = append_unique_jsonl(dir.path(), "c.jsonl", "c.idx", &items(&["a", "b"]), key_of).unwrap();
    assert_eq!(written, 2);

    let written = append_unique_jsonl(dir.path(), "c.jsonl", "c.idx", &items(&["a", "b"]), key_of).unwrap();
    assert_eq!(written, 0, "repeat append should write nothing");

    let written = append_unique_jsonl(dir.path(), "c.jsonl", "c.idx", &items(&["b", "c"]), key_of).unwrap();
    assert_eq!(written, 1);

    assert_eq!(jsonl_keys(&dir.path().join("c.jsonl")), vec!["a", "b", "c"]);
}

#[test]
fn test_index_and_data_keys_match_union() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let batches: [&[&str]; 4] = [&["x", "y"], &["y", "y", "z"], &[], &["", "w", "x"]];
    let mut union = HashSet::new();
    for batch in batches {
        append_unique_jsonl(dir.path(), "d.jsonl", "d.idx", &items(batch), key_of).unwrap();
        union.extend(batch.iter().filter(|k| !k.is_empty()).map(|k| (*k).to_string()));
    }

    let data: HashSet<String> = jsonl_keys(&dir.path().join("d.jsonl")).into_iter().collect();
    let index = load_index(&dir.path().join("d.idx")).unwrap();
    assert_eq!(data, union);
    assert_eq!(index, union);
    assert_eq!(jsonl_keys(&dir.path().join("d.jsonl")).len(), union.len(), "no duplicate lines");
}

#[test]
fn test_partial_trailing_index_line_is_tolerated() {
    let dir = TempDir::new().expect("failed to create temp dir");
    fs::write(dir.path().join("p.idx"), "a\nb").unwrap();

    let written = append_unique_jsonl(dir.path(), "p.jsonl", "p.idx", &items(&["b", "c"]), key_of).unwrap();
    assert_eq!(written, 1);
    let index = fs::read_to_string(dir.path().join("p.idx")).unwrap();
    assert_eq!(index, "a\nb\nc\n");
}

// ==================== CSV Tests ====================

#[test]
fn test_append_unique_csv_writes_bom_and_header_once() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let header = ["id", "label"];
    let row = |item: &Item| vec![item.id.clone(), format!("label, {}", item.id)];

    append_unique_csv(dir.path(), "c.csv", "c.idx", &items(&["a"]), key_of, &header, row).unwrap();
    let written =
        append_unique_csv(dir.path(), "c.csv", "c.idx", &items(&["a", "b"]), key_of, &header, row).unwrap();
    assert_eq!(written, 1);

    let bytes = fs::read(dir.path().join("c.csv")).unwrap();
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["id,label", "a,\"label, a\"", "b,\"label, b\""]);
}

#[test]
fn test_append_unique_csv_rejects_header_mismatch() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let row = |item: &Item| vec![item.id.clone()];
    append_unique_csv(dir.path(), "m.csv", "m.idx", &items(&["a"]), key_of, &["id"], row).unwrap();

    let result = append_unique_csv(dir.path(), "m.csv", "m.idx", &items(&["b"]), key_of, &["key"], row);
    assert!(result.is_err(), "a different header must not be appended to");
}

// ==================== Store Tests ====================

#[tokio::test]
async fn test_store_comments_json_layout() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = open_store(&dir, SaveOption::Json).await;
    let cancel = CancellationToken::new();

    let first = [comment("BV1", "1"), comment("BV1", "2")];
    assert_eq!(store.save_comments(&cancel, "BV1", &first).await.unwrap(), 2);
    let again = [comment("BV1", "2"), comment("BV1", "3")];
    assert_eq!(store.save_comments(&cancel, "BV1", &again).await.unwrap(), 1);

    let note_dir = dir.path().join("bilibili/notes/BV1");
    let lines = fs::read_to_string(note_dir.join("comments.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), 3);
}

#[tokio::test]
async fn test_store_note_detail_and_creator_files() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = open_store(&dir, SaveOption::Json).await;
    let cancel = CancellationToken::new();

    store
        .save_note_detail(&cancel, "BV9", &json!({"title": "first"}))
        .await
        .unwrap();
    store
        .save_note_detail(&cancel, "BV9", &json!({"title": "second"}))
        .await
        .unwrap();
    let note: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("bilibili/notes/BV9/note.json")).unwrap())
            .unwrap();
    assert_eq!(note["title"], "second", "note.json is overwritten");

    let written = store
        .append_creator_dynamics(&cancel, "42", &items(&["v1", "v2", "v1"]), key_of)
        .unwrap();
    assert_eq!(written, 2);
    assert!(dir.path().join("bilibili/creators/42/dynamics.jsonl").exists());
}

#[tokio::test]
async fn test_store_rejects_path_keys_and_cancellation() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = open_store(&dir, SaveOption::Json).await;
    let cancel = CancellationToken::new();

    assert!(store.save_note_detail(&cancel, "../x", &json!({})).await.is_err());

    cancel.cancel();
    assert!(store.save_note_detail(&cancel, "ok", &json!({})).await.is_err());
    assert!(!dir.path().join("bilibili/notes/ok").exists());
}
