//! Integration tests for the SQLite mirror behind the store.

use media_crawler_core::store::mirror::{MirrorTable, SqlPool};
use media_crawler_core::store::{
    Backend, Mirror, MirrorSettings, SaveOption, Store, StoreOptions, UnifiedComment,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn sqlite_store(dir: &TempDir) -> Store {
    Store::open(&StoreOptions {
        data_dir: dir.path().join("data"),
        platform: "weibo".to_string(),
        mode: "detail".to_string(),
        save_option: SaveOption::Json,
        backend: Backend::Sqlite,
        mirror: MirrorSettings {
            sqlite_path: dir.path().join("db").join("crawler.db").display().to_string(),
            ..MirrorSettings::default()
        },
    })
    .await
    .unwrap()
}

fn comment(id: &str, content: &str) -> UnifiedComment {
    UnifiedComment {
        platform: "weibo".to_string(),
        note_id: "4890".to_string(),
        comment_id: id.to_string(),
        content: content.to_string(),
        ..UnifiedComment::default()
    }
}

async fn count(store: &Store, table: MirrorTable) -> i64 {
    let Some(Mirror::Sql(sql)) = store.mirror() else {
        panic!("expected a relational mirror");
    };
    sql.count(table, "weibo").await.unwrap()
}

// ==================== Note Upsert Tests ====================

#[tokio::test]
async fn test_repeated_note_saves_keep_one_row_with_last_payload() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    let token = CancellationToken::new();

    for likes in [1, 2, 3] {
        store
            .save_note_detail(&token, "4890", &json!({"id": "4890", "likes": likes}))
            .await
            .unwrap();
    }

    assert_eq!(count(&store, MirrorTable::Notes).await, 1);

    let Some(Mirror::Sql(sql)) = store.mirror() else {
        panic!("expected a relational mirror");
    };
    let SqlPool::Sqlite(pool) = sql.pool() else {
        panic!("expected a sqlite pool");
    };
    let data: String = sqlx::query_scalar("SELECT data_json FROM notes WHERE platform = ? AND note_id = ?")
        .bind("weibo")
        .bind("4890")
        .fetch_one(pool)
        .await
        .unwrap();
    let data: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(data["likes"], 3);

    let on_disk = std::fs::read_to_string(store.note_dir("4890").unwrap().join("note.json")).unwrap();
    assert!(on_disk.contains("\"likes\": 3"));
}

#[tokio::test]
async fn test_creator_profile_is_mirrored() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    let token = CancellationToken::new();

    store
        .save_creator_profile(&token, "u100", &json!({"uid": "u100"}))
        .await
        .unwrap();
    store
        .save_creator_profile(&token, "u100", &json!({"uid": "u100", "followers": 5}))
        .await
        .unwrap();

    assert_eq!(count(&store, MirrorTable::Creators).await, 1);
}

// ==================== Comment Insert Tests ====================

#[tokio::test]
async fn test_comment_rows_are_inserted_once() {
    let dir = TempDir::new().unwrap();
    let store = sqlite_store(&dir).await;
    let token = CancellationToken::new();

    let first = [comment("c1", "first"), comment("c2", "second")];
    assert_eq!(store.save_comments(&token, "4890", &first).await.unwrap(), 2);

    let again = [comment("c2", "edited"), comment("c3", "third")];
    assert_eq!(store.save_comments(&token, "4890", &again).await.unwrap(), 1);

    assert_eq!(count(&store, MirrorTable::Comments).await, 3);
}

#[tokio::test]
async fn test_missing_sqlite_path_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = Store::open(&StoreOptions {
        data_dir: dir.path().to_path_buf(),
        platform: "weibo".to_string(),
        backend: Backend::Sqlite,
        ..StoreOptions::default()
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("sqlite_path"), "{err}");
}
