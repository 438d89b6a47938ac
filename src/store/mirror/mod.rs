//! Optional database mirror of notes, creators and comments.

mod mongo;
mod sql;

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, PoisonError};

pub use mongo::{DEFAULT_MONGO_DB, MongoMirror};
pub(crate) use sql::Entity;
pub use sql::{MirrorTable, SqlMirror, SqlPool};

use super::{Backend, StoreError};

/// `(backend, dsn)` pairs whose schema was created in this process.
static SCHEMA_READY: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

fn schema_pending(key: &str) -> bool {
    !SCHEMA_READY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(key)
}

fn schema_ready(key: String) {
    SCHEMA_READY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key);
}

/// One comment row for the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorComment {
    pub comment_id: String,
    pub data_json: String,
}

/// Connection settings for [`Mirror::connect`].
#[derive(Debug, Clone, Default)]
pub struct MirrorSettings {
    pub sqlite_path: String,
    pub mysql_dsn: String,
    pub postgres_dsn: String,
    pub mongo_uri: String,
    pub mongo_db: String,
}

/// Relational or document mirror.
#[derive(Debug, Clone)]
pub enum Mirror {
    Sql(SqlMirror),
    Mongo(MongoMirror),
}

impl Mirror {
    /// Connects the mirror for `backend`. `Backend::File` has none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingSetting`] when the backend's connection
    /// string is blank, or the connection error.
    pub async fn connect(
        backend: Backend,
        settings: &MirrorSettings,
    ) -> Result<Option<Self>, StoreError> {
        let required = |value: &str, setting: &'static str| {
            let value = value.trim();
            if value.is_empty() {
                Err(StoreError::MissingSetting {
                    backend: backend.as_str(),
                    setting,
                })
            } else {
                Ok(value.to_string())
            }
        };
        let mirror = match backend {
            Backend::File => return Ok(None),
            Backend::Sqlite => {
                let dsn = required(&settings.sqlite_path, "sqlite_path")?;
                Self::Sql(SqlMirror::connect(backend, &dsn).await?)
            }
            Backend::Mysql => {
                let dsn = required(&settings.mysql_dsn, "mysql_dsn")?;
                Self::Sql(SqlMirror::connect(backend, &dsn).await?)
            }
            Backend::Postgres => {
                let dsn = required(&settings.postgres_dsn, "postgres_dsn")?;
                Self::Sql(SqlMirror::connect(backend, &dsn).await?)
            }
            Backend::Mongodb => {
                let uri = required(&settings.mongo_uri, "mongo_uri")?;
                Self::Mongo(MongoMirror::connect(&uri, &settings.mongo_db).await?)
            }
        };
        Ok(Some(mirror))
    }

    pub(crate) async fn upsert(
        &self,
        entity: Entity,
        platform: &str,
        id: &str,
        data_json: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        match self {
            Self::Sql(m) => m.upsert(entity, platform, id, data_json, now).await,
            Self::Mongo(m) => m.upsert(entity, platform, id, data_json, now).await,
        }
    }

    pub(crate) async fn insert_comments(
        &self,
        platform: &str,
        note_id: &str,
        comments: &[MirrorComment],
        now: i64,
    ) -> Result<(), StoreError> {
        if comments.is_empty() {
            return Ok(());
        }
        match self {
            Self::Sql(m) => m.insert_comments(platform, note_id, comments, now).await,
            Self::Mongo(m) => m.insert_comments(platform, note_id, comments, now).await,
        }
    }
}
