//! Relational mirror over SQLite, MySQL or PostgreSQL.
//!
//! The same three tables exist on every backend:
//!
//! ```text
//! notes(platform, note_id, data_json, updated_at)          PK(platform, note_id)
//! creators(platform, creator_id, data_json, updated_at)    PK(platform, creator_id)
//! comments(platform, comment_id, note_id, data_json, created_at)
//!                                  PK(platform, comment_id), idx_comments_note(platform, note_id)
//! ```
//!
//! Notes and creators are upserted; comments are inserted with
//! ignore-on-conflict inside one transaction per batch.

use std::path::Path;
use std::time::Duration;

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use super::{MirrorComment, schema_pending, schema_ready};
use crate::store::{Backend, StoreError};

/// Pool size shared by every relational backend.
const MAX_CONNECTIONS: u32 = 8;

/// How long an operation waits for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite busy timeout.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SQLITE_SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS notes (
        platform TEXT NOT NULL,
        note_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY(platform, note_id)
    )",
    "CREATE TABLE IF NOT EXISTS creators (
        platform TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY(platform, creator_id)
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        platform TEXT NOT NULL,
        comment_id TEXT NOT NULL,
        note_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY(platform, comment_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_comments_note ON comments(platform, note_id)",
];

const POSTGRES_SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS notes (
        platform TEXT NOT NULL,
        note_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY(platform, note_id)
    )",
    "CREATE TABLE IF NOT EXISTS creators (
        platform TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY(platform, creator_id)
    )",
    "CREATE TABLE IF NOT EXISTS comments (
        platform TEXT NOT NULL,
        comment_id TEXT NOT NULL,
        note_id TEXT NOT NULL,
        data_json TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        PRIMARY KEY(platform, comment_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_comments_note ON comments(platform, note_id)",
];

const MYSQL_SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS notes (
        platform VARCHAR(32) NOT NULL,
        note_id VARCHAR(191) NOT NULL,
        data_json LONGTEXT NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY(platform, note_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS creators (
        platform VARCHAR(32) NOT NULL,
        creator_id VARCHAR(191) NOT NULL,
        data_json LONGTEXT NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY(platform, creator_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    "CREATE TABLE IF NOT EXISTS comments (
        platform VARCHAR(32) NOT NULL,
        comment_id VARCHAR(191) NOT NULL,
        note_id VARCHAR(191) NOT NULL,
        data_json LONGTEXT NOT NULL,
        created_at BIGINT NOT NULL,
        PRIMARY KEY(platform, comment_id),
        KEY idx_comments_note(platform, note_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
];

/// Which upsert target.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Entity {
    Note,
    Creator,
}

impl Entity {
    fn table(self) -> &'static str {
        match self {
            Self::Note => "notes",
            Self::Creator => "creators",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            Self::Note => "note_id",
            Self::Creator => "creator_id",
        }
    }
}

/// Backend-specific pool.
#[derive(Debug, Clone)]
pub enum SqlPool {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
    Postgres(PgPool),
}

/// Relational mirror handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SqlMirror {
    pool: SqlPool,
}

fn sql_err(backend: Backend, op: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::Sql {
        backend: backend.as_str(),
        op,
        source,
    }
}

impl SqlMirror {
    /// Opens a pool and creates the schema once per `(backend, dsn)`.
    ///
    /// For SQLite `dsn` is a file path (parent directories are created);
    /// MySQL and PostgreSQL take connection URLs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sql`] when the connection or schema creation
    /// fails, or [`StoreError::Unsupported`] for a non-relational backend.
    #[instrument(skip(dsn), fields(backend = backend.as_str()))]
    pub async fn connect(backend: Backend, dsn: &str) -> Result<Self, StoreError> {
        let pool = match backend {
            Backend::Sqlite => {
                let path = Path::new(dsn);
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(BUSY_TIMEOUT);
                let pool = SqlitePoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_with(options)
                    .await
                    .map_err(sql_err(backend, "connect"))?;
                SqlPool::Sqlite(pool)
            }
            Backend::Mysql => SqlPool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(dsn)
                    .await
                    .map_err(sql_err(backend, "connect"))?,
            ),
            Backend::Postgres => SqlPool::Postgres(
                PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(dsn)
                    .await
                    .map_err(sql_err(backend, "connect"))?,
            ),
            Backend::File | Backend::Mongodb => {
                return Err(StoreError::Unsupported {
                    what: "relational backend",
                    value: backend.as_str().to_string(),
                });
            }
        };

        let mirror = Self { pool };
        let schema_key = format!("{}|{dsn}", backend.as_str());
        if schema_pending(&schema_key) {
            mirror.create_schema().await?;
            schema_ready(schema_key);
            debug!("mirror schema ready");
        }
        Ok(mirror)
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        match self.pool {
            SqlPool::Sqlite(_) => Backend::Sqlite,
            SqlPool::MySql(_) => Backend::Mysql,
            SqlPool::Postgres(_) => Backend::Postgres,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlPool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let backend = self.backend();
        match &self.pool {
            SqlPool::Sqlite(pool) => {
                for ddl in SQLITE_SCHEMA {
                    sqlx::query(ddl)
                        .execute(pool)
                        .await
                        .map_err(sql_err(backend, "create schema"))?;
                }
            }
            SqlPool::Postgres(pool) => {
                for ddl in POSTGRES_SCHEMA {
                    sqlx::query(ddl)
                        .execute(pool)
                        .await
                        .map_err(sql_err(backend, "create schema"))?;
                }
            }
            SqlPool::MySql(pool) => {
                for ddl in MYSQL_SCHEMA {
                    sqlx::query(ddl)
                        .execute(pool)
                        .await
                        .map_err(sql_err(backend, "create schema"))?;
                }
            }
        }
        Ok(())
    }

    /// Inserts or replaces one note/creator row.
    pub(crate) async fn upsert(
        &self,
        entity: Entity,
        platform: &str,
        id: &str,
        data_json: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let (table, id_col) = (entity.table(), entity.id_column());
        match &self.pool {
            SqlPool::Sqlite(pool) => {
                let sql = format!(
                    "INSERT INTO {table}(platform, {id_col}, data_json, updated_at) VALUES(?, ?, ?, ?) \
                     ON CONFLICT(platform, {id_col}) DO UPDATE SET data_json=excluded.data_json, updated_at=excluded.updated_at"
                );
                sqlx::query(&sql)
                    .bind(platform)
                    .bind(id)
                    .bind(data_json)
                    .bind(now)
                    .execute(pool)
                    .await
                    .map_err(sql_err(Backend::Sqlite, "upsert"))?;
            }
            SqlPool::Postgres(pool) => {
                let sql = format!(
                    "INSERT INTO {table}(platform, {id_col}, data_json, updated_at) VALUES($1, $2, $3, $4) \
                     ON CONFLICT(platform, {id_col}) DO UPDATE SET data_json=excluded.data_json, updated_at=excluded.updated_at"
                );
                sqlx::query(&sql)
                    .bind(platform)
                    .bind(id)
                    .bind(data_json)
                    .bind(now)
                    .execute(pool)
                    .await
                    .map_err(sql_err(Backend::Postgres, "upsert"))?;
            }
            SqlPool::MySql(pool) => {
                let sql = format!(
                    "INSERT INTO {table}(platform, {id_col}, data_json, updated_at) VALUES(?, ?, ?, ?) \
                     ON DUPLICATE KEY UPDATE data_json=VALUES(data_json), updated_at=VALUES(updated_at)"
                );
                sqlx::query(&sql)
                    .bind(platform)
                    .bind(id)
                    .bind(data_json)
                    .bind(now)
                    .execute(pool)
                    .await
                    .map_err(sql_err(Backend::Mysql, "upsert"))?;
            }
        }
        Ok(())
    }

    /// Inserts comments, ignoring rows already present, in one transaction.
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
        match &self.pool {
            SqlPool::Sqlite(pool) => {
                let backend = Backend::Sqlite;
                let mut tx = pool.begin().await.map_err(sql_err(backend, "begin"))?;
                for c in comments {
                    sqlx::query(
                        "INSERT OR IGNORE INTO comments(platform, comment_id, note_id, data_json, created_at) \
                         VALUES(?, ?, ?, ?, ?)",
                    )
                    .bind(platform)
                    .bind(&c.comment_id)
                    .bind(note_id)
                    .bind(&c.data_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(sql_err(backend, "insert comments"))?;
                }
                tx.commit().await.map_err(sql_err(backend, "commit"))?;
            }
            SqlPool::Postgres(pool) => {
                let backend = Backend::Postgres;
                let mut tx = pool.begin().await.map_err(sql_err(backend, "begin"))?;
                for c in comments {
                    sqlx::query(
                        "INSERT INTO comments(platform, comment_id, note_id, data_json, created_at) \
                         VALUES($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
                    )
                    .bind(platform)
                    .bind(&c.comment_id)
                    .bind(note_id)
                    .bind(&c.data_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(sql_err(backend, "insert comments"))?;
                }
                tx.commit().await.map_err(sql_err(backend, "commit"))?;
            }
            SqlPool::MySql(pool) => {
                let backend = Backend::Mysql;
                let mut tx = pool.begin().await.map_err(sql_err(backend, "begin"))?;
                for c in comments {
                    sqlx::query(
                        "INSERT IGNORE INTO comments(platform, comment_id, note_id, data_json, created_at) \
                         VALUES(?, ?, ?, ?, ?)",
                    )
                    .bind(platform)
                    .bind(&c.comment_id)
                    .bind(note_id)
                    .bind(&c.data_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(sql_err(backend, "insert comments"))?;
                }
                tx.commit().await.map_err(sql_err(backend, "commit"))?;
            }
        }
        debug!(note_id, count = comments.len(), "mirrored comments");
        Ok(())
    }

    /// Row count of `table` for `platform`, used by `init-db` and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sql`] when the query fails.
    pub async fn count(&self, table: MirrorTable, platform: &str) -> Result<i64, StoreError> {
        let table = table.as_str();
        let count = match &self.pool {
            SqlPool::Sqlite(pool) => sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {table} WHERE platform = ?"
            ))
            .bind(platform)
            .fetch_one(pool)
            .await
            .map_err(sql_err(Backend::Sqlite, "count"))?,
            SqlPool::Postgres(pool) => sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {table} WHERE platform = $1"
            ))
            .bind(platform)
            .fetch_one(pool)
            .await
            .map_err(sql_err(Backend::Postgres, "count"))?,
            SqlPool::MySql(pool) => sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {table} WHERE platform = ?"
            ))
            .bind(platform)
            .fetch_one(pool)
            .await
            .map_err(sql_err(Backend::Mysql, "count"))?,
        };
        Ok(count)
    }
}

/// Mirror tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorTable {
    Notes,
    Creators,
    Comments,
}

impl MirrorTable {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Creators => "creators",
            Self::Comments => "comments",
        }
    }
}
