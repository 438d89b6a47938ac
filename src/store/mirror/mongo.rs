//! Document mirror over MongoDB.
//!
//! Collections `notes`, `creators` and `comments` hold `{platform, <id>,
//! data_json, ...}` documents with compound unique indexes on
//! `(platform, <id>)`.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use mongodb::bson::{Document, doc};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, instrument};

use super::sql::Entity;
use super::{MirrorComment, schema_pending, schema_ready};
use crate::store::StoreError;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Default database name.
pub const DEFAULT_MONGO_DB: &str = "media_crawler";

fn mongo_err(op: &'static str) -> impl FnOnce(mongodb::error::Error) -> StoreError {
    move |source| StoreError::Mongo { op, source }
}

/// Document mirror handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MongoMirror {
    db: Database,
}

impl MongoMirror {
    /// Connects, pings the server and creates indexes once per
    /// `(uri, database)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Mongo`] when the server is unreachable within
    /// the 10 s selection timeout or index creation fails.
    #[instrument(skip(uri))]
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let db_name = if db_name.trim().is_empty() {
            DEFAULT_MONGO_DB
        } else {
            db_name.trim()
        };
        let mut options = ClientOptions::parse(uri).await.map_err(mongo_err("parse uri"))?;
        options.server_selection_timeout = Some(TIMEOUT);
        options.connect_timeout = Some(TIMEOUT);
        let client = Client::with_options(options).map_err(mongo_err("connect"))?;
        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(mongo_err("ping"))?;

        let mirror = Self { db };
        let schema_key = format!("mongodb|{uri}|{db_name}");
        if schema_pending(&schema_key) {
            mirror.create_indexes().await?;
            schema_ready(schema_key);
            debug!("mongo indexes ready");
        }
        Ok(mirror)
    }

    async fn create_indexes(&self) -> Result<(), StoreError> {
        let unique = |name: &str| {
            IndexOptions::builder()
                .unique(true)
                .name(name.to_string())
                .build()
        };
        self.collection("notes")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "platform": 1, "note_id": 1 })
                    .options(unique("uniq_platform_note"))
                    .build(),
            )
            .await
            .map_err(mongo_err("create index notes"))?;
        self.collection("creators")
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "platform": 1, "creator_id": 1 })
                    .options(unique("uniq_platform_creator"))
                    .build(),
            )
            .await
            .map_err(mongo_err("create index creators"))?;
        let comments = self.collection("comments");
        comments
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "platform": 1, "comment_id": 1 })
                    .options(unique("uniq_platform_comment"))
                    .build(),
            )
            .await
            .map_err(mongo_err("create index comments"))?;
        comments
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "platform": 1, "note_id": 1 })
                    .options(IndexOptions::builder().name("idx_platform_note".to_string()).build())
                    .build(),
            )
            .await
            .map_err(mongo_err("create index comments"))?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    pub(crate) async fn upsert(
        &self,
        entity: Entity,
        platform: &str,
        id: &str,
        data_json: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let (coll, id_field) = match entity {
            Entity::Note => ("notes", "note_id"),
            Entity::Creator => ("creators", "creator_id"),
        };
        let filter = doc! { "platform": platform, id_field: id };
        let update = doc! { "$set": {
            "platform": platform,
            id_field: id,
            "data_json": data_json,
            "updated_at": now,
            "updated_iso": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }};
        self.collection(coll)
            .update_one(filter, update)
            .upsert(true)
            .await
            .map_err(mongo_err("upsert"))?;
        Ok(())
    }

    pub(crate) async fn insert_comments(
        &self,
        platform: &str,
        note_id: &str,
        comments: &[MirrorComment],
        now: i64,
    ) -> Result<(), StoreError> {
        let coll = self.collection("comments");
        let created_iso = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        for c in comments {
            let filter = doc! { "platform": platform, "comment_id": c.comment_id.as_str() };
            let update = doc! { "$setOnInsert": {
                "platform": platform,
                "comment_id": c.comment_id.as_str(),
                "note_id": note_id,
                "data_json": c.data_json.as_str(),
                "created_at": now,
                "created_iso": created_iso.as_str(),
            }};
            coll.update_one(filter, update)
                .upsert(true)
                .await
                .map_err(mongo_err("insert comments"))?;
        }
        Ok(())
    }
}
