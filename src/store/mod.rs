//! Write-once content store.
//!
//! Layout under `<data_dir>/<platform>/`:
//!
//! ```text
//! notes/<note>/note.{json,csv,xlsx}
//! notes/<note>/comments.{jsonl,csv,xlsx} + comments.idx
//! notes/<note>/media/
//! creators/<creator>/profile.json, dynamics.jsonl + dynamics.idx
//! comments.{jsonl,csv,xlsx} + comments.global.idx
//! <platform>_<mode>_<stamp>.xlsx (+ <stamp>.<sheet>.idx)
//! ```
//!
//! Notes and creators are mirrored before their files are written; comment
//! files are appended before their mirror insert. Every operation checks the
//! job's cancellation token before touching disk.

pub mod append;
mod comment;
mod error;
pub mod mirror;
mod workbook;
pub mod xlsx;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::crawler::unix_now;

pub use comment::UnifiedComment;
pub use error::StoreError;
pub use mirror::{Mirror, MirrorComment, MirrorSettings};
pub use workbook::{COMMENTS_SHEET, CONTENTS_SHEET, CREATORS_SHEET, RunWorkbook};

use append::{append_unique_csv, append_unique_jsonl, tabular, write_csv};
use mirror::Entity;
use xlsx::{append_unique_xlsx, write_single_sheet};

const COMMENTS_INDEX: &str = "comments.idx";
const GLOBAL_COMMENTS_INDEX: &str = "comments.global.idx";

/// Output format for note, creator and comment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveOption {
    #[default]
    Json,
    Csv,
    Xlsx,
    XlsxBook,
}

impl SaveOption {
    /// Parses a save option; `excel` is an alias of `xlsx_book`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unsupported`] for unknown values.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value.trim().to_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "xlsx_book" | "excel" => Ok(Self::XlsxBook),
            other => Err(StoreError::Unsupported {
                what: "save_data_option",
                value: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::XlsxBook => "xlsx_book",
        }
    }
}

impl fmt::Display for SaveOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mirror backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    File,
    Sqlite,
    Mysql,
    Postgres,
    Mongodb,
}

impl Backend {
    /// Parses a backend name; `postgresql` and `mongo` are aliases.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unsupported`] for unknown values.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value.trim().to_lowercase().as_str() {
            "" | "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mongodb" | "mongo" => Ok(Self::Mongodb),
            other => Err(StoreError::Unsupported {
                what: "store_backend",
                value: other.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
            Self::Mongodb => "mongodb",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything [`Store::open`] needs.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub data_dir: PathBuf,
    pub platform: String,
    pub mode: String,
    pub save_option: SaveOption,
    pub backend: Backend,
    pub mirror: MirrorSettings,
}

/// Per-job store handle.
#[derive(Debug)]
pub struct Store {
    platform: String,
    platform_dir: PathBuf,
    save_option: SaveOption,
    mirror: Option<Mirror>,
    book: Option<RunWorkbook>,
    /// Held across each platform-wide comment append (index read to index write).
    global_comments: Mutex<()>,
}

fn check(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Canceled)
    } else {
        Ok(())
    }
}

fn entity_key(key: &str) -> Result<&str, StoreError> {
    let key = key.trim();
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(key)
}

fn to_json(path: &Path, value: &impl Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::encode(path, e))
}

impl Store {
    /// Opens the store: connects the mirror (if any) and names the run
    /// workbook in `xlsx_book` mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for a blank platform or the mirror's
    /// connection error.
    #[instrument(skip(options), fields(platform = %options.platform, backend = %options.backend))]
    pub async fn open(options: &StoreOptions) -> Result<Self, StoreError> {
        let platform = entity_key(&options.platform)?.to_string();
        let platform_dir = options.data_dir.join(&platform);
        let mirror = Mirror::connect(options.backend, &options.mirror).await?;
        let book = (options.save_option == SaveOption::XlsxBook).then(|| {
            let mode = match options.mode.trim() {
                "" => "search",
                mode => mode,
            };
            RunWorkbook::new(&platform_dir, &platform, mode)
        });
        debug!(dir = %platform_dir.display(), save_option = %options.save_option, "store opened");
        Ok(Self {
            platform,
            platform_dir,
            save_option: options.save_option,
            mirror,
            book,
            global_comments: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn platform_dir(&self) -> &Path {
        &self.platform_dir
    }

    #[must_use]
    pub fn save_option(&self) -> SaveOption {
        self.save_option
    }

    #[must_use]
    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    #[must_use]
    pub fn workbook(&self) -> Option<&RunWorkbook> {
        self.book.as_ref()
    }

    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for keys that are blank or contain
    /// path separators.
    pub fn note_dir(&self, note_key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.platform_dir.join("notes").join(entity_key(note_key)?))
    }

    /// # Errors
    ///
    /// Same as [`note_dir`](Self::note_dir).
    pub fn note_media_dir(&self, note_key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.note_dir(note_key)?.join("media"))
    }

    /// # Errors
    ///
    /// Same as [`note_dir`](Self::note_dir).
    pub fn creator_dir(&self, creator_key: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .platform_dir
            .join("creators")
            .join(entity_key(creator_key)?))
    }

    /// Persists a note's detail payload according to the save option.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the mirror or the file write.
    #[instrument(skip(self, cancel, note), fields(platform = %self.platform))]
    pub async fn save_note_detail(
        &self,
        cancel: &CancellationToken,
        note_key: &str,
        note: &Value,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let dir = self.note_dir(note_key)?;
        let key = entity_key(note_key)?;
        if let Some(mirror) = &self.mirror {
            let data = to_json(&dir, note)?;
            mirror
                .upsert(Entity::Note, &self.platform, key, &data, unix_now())
                .await?;
        }

        append::create_dir(&dir)?;
        match self.save_option {
            SaveOption::Json => write_pretty_json(&dir.join("note.json"), note)?,
            SaveOption::Csv => {
                let (header, row) = tabular(note);
                write_csv(&dir.join("note.csv"), &header, &[row])?;
            }
            SaveOption::Xlsx => {
                let (header, row) = tabular(note);
                write_single_sheet(&dir.join("note.xlsx"), &header, &[row])?;
            }
            SaveOption::XlsxBook => {
                write_pretty_json(&dir.join("note.json"), note)?;
                self.append_book_row(CONTENTS_SHEET, key, note)?;
            }
        }
        debug!(note_id = key, "note saved");
        Ok(())
    }

    /// Persists a creator profile to `profile.json` (and the `Creators` sheet
    /// in book mode).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the mirror or the file write.
    #[instrument(skip(self, cancel, profile), fields(platform = %self.platform))]
    pub async fn save_creator_profile(
        &self,
        cancel: &CancellationToken,
        creator_key: &str,
        profile: &Value,
    ) -> Result<(), StoreError> {
        check(cancel)?;
        let dir = self.creator_dir(creator_key)?;
        let key = entity_key(creator_key)?;
        if let Some(mirror) = &self.mirror {
            let data = to_json(&dir, profile)?;
            mirror
                .upsert(Entity::Creator, &self.platform, key, &data, unix_now())
                .await?;
        }
        append::create_dir(&dir)?;
        write_pretty_json(&dir.join("profile.json"), profile)?;
        if self.save_option == SaveOption::XlsxBook {
            self.append_book_row(CREATORS_SHEET, key, profile)?;
        }
        debug!(creator_id = key, "creator profile saved");
        Ok(())
    }

    /// Appends a creator's feed entries to `dynamics.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    pub fn append_creator_dynamics<T, K>(
        &self,
        cancel: &CancellationToken,
        creator_key: &str,
        items: &[T],
        key_of: K,
    ) -> Result<usize, StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
    {
        check(cancel)?;
        let dir = self.creator_dir(creator_key)?;
        append_unique_jsonl(&dir, "dynamics.jsonl", "dynamics.idx", items, key_of)
    }

    /// Per-note `comments.jsonl`, then mirror.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the file append or the mirror.
    pub async fn append_unique_comments_jsonl<T, K>(
        &self,
        cancel: &CancellationToken,
        note_key: &str,
        items: &[T],
        key_of: K,
    ) -> Result<usize, StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
    {
        check(cancel)?;
        let dir = self.note_dir(note_key)?;
        let written = append_unique_jsonl(&dir, "comments.jsonl", COMMENTS_INDEX, items, &key_of)?;
        self.mirror_comments(&dir, note_key, items, &key_of).await?;
        Ok(written)
    }

    /// Per-note `comments.csv`, then mirror.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the file append or the mirror.
    pub async fn append_unique_comments_csv<T, K, R>(
        &self,
        cancel: &CancellationToken,
        note_key: &str,
        items: &[T],
        key_of: K,
        header: &[&str],
        row_of: R,
    ) -> Result<usize, StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
        R: Fn(&T) -> Vec<String>,
    {
        check(cancel)?;
        let dir = self.note_dir(note_key)?;
        let written =
            append_unique_csv(&dir, "comments.csv", COMMENTS_INDEX, items, &key_of, header, row_of)?;
        self.mirror_comments(&dir, note_key, items, &key_of).await?;
        Ok(written)
    }

    /// Per-note `comments.xlsx`, then mirror.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] from the file append or the mirror.
    pub async fn append_unique_comments_xlsx<T, K, R>(
        &self,
        cancel: &CancellationToken,
        note_key: &str,
        items: &[T],
        key_of: K,
        header: &[&str],
        row_of: R,
    ) -> Result<usize, StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
        R: Fn(&T) -> Vec<String>,
    {
        check(cancel)?;
        let dir = self.note_dir(note_key)?;
        let written = append_unique_xlsx(
            &dir,
            "comments.xlsx",
            COMMENTS_INDEX,
            items,
            &key_of,
            "Sheet1",
            header,
            row_of,
        )?;
        self.mirror_comments(&dir, note_key, items, &key_of).await?;
        Ok(written)
    }

    /// Platform-wide `comments.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    pub fn append_unique_global_comments_jsonl<T, K>(
        &self,
        cancel: &CancellationToken,
        items: &[T],
        key_of: K,
    ) -> Result<usize, StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
    {
        check(cancel)?;
        let _guard = self.lock_global_comments();
        append_unique_jsonl(
            &self.platform_dir,
            "comments.jsonl",
            GLOBAL_COMMENTS_INDEX,
            items,
            key_of,
        )
    }

    /// Platform-wide `comments.csv`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or header mismatch.
    pub fn append_unique_global_comments_csv<T, K, R>(
        &self,
        cancel: &CancellationToken,
        items: &[T],
        key_of: K,
        header: &[&str],
        row_of: R,
    ) -> Result<usize, StoreError>
    where
        K: Fn(&T) -> String,
        R: Fn(&T) -> Vec<String>,
    {
        check(cancel)?;
        let _guard = self.lock_global_comments();
        append_unique_csv(
            &self.platform_dir,
            "comments.csv",
            GLOBAL_COMMENTS_INDEX,
            items,
            key_of,
            header,
            row_of,
        )
    }

    /// Platform-wide `comments.xlsx`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or header mismatch.
    pub fn append_unique_global_comments_xlsx<T, K, R>(
        &self,
        cancel: &CancellationToken,
        items: &[T],
        key_of: K,
        header: &[&str],
        row_of: R,
    ) -> Result<usize, StoreError>
    where
        K: Fn(&T) -> String,
        R: Fn(&T) -> Vec<String>,
    {
        check(cancel)?;
        let _guard = self.lock_global_comments();
        append_unique_xlsx(
            &self.platform_dir,
            "comments.xlsx",
            GLOBAL_COMMENTS_INDEX,
            items,
            key_of,
            "Sheet1",
            header,
            row_of,
        )
    }

    /// Appends comments to the run workbook's `Comments` sheet. Without a
    /// workbook (other save options) nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or header mismatch.
    pub fn append_book_comments(
        &self,
        cancel: &CancellationToken,
        comments: &[UnifiedComment],
    ) -> Result<usize, StoreError> {
        check(cancel)?;
        let Some(book) = &self.book else {
            return Ok(0);
        };
        book.append_unique_rows(
            COMMENTS_SHEET,
            comments,
            UnifiedComment::key,
            &UnifiedComment::header(),
            UnifiedComment::to_row,
        )
    }

    /// Writes a note's comments to the per-note and platform-wide outputs of
    /// the configured save option. Returns the number of new per-note rows.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] encountered.
    #[instrument(skip(self, cancel, comments), fields(platform = %self.platform, count = comments.len()))]
    pub async fn save_comments(
        &self,
        cancel: &CancellationToken,
        note_key: &str,
        comments: &[UnifiedComment],
    ) -> Result<usize, StoreError> {
        if comments.is_empty() {
            return Ok(0);
        }
        let header = UnifiedComment::HEADER;
        match self.save_option {
            SaveOption::Json => {
                let written = self
                    .append_unique_comments_jsonl(cancel, note_key, comments, UnifiedComment::key)
                    .await?;
                self.append_unique_global_comments_jsonl(cancel, comments, UnifiedComment::key)?;
                Ok(written)
            }
            SaveOption::Csv => {
                let written = self
                    .append_unique_comments_csv(
                        cancel,
                        note_key,
                        comments,
                        UnifiedComment::key,
                        &header,
                        UnifiedComment::to_row,
                    )
                    .await?;
                self.append_unique_global_comments_csv(
                    cancel,
                    comments,
                    UnifiedComment::key,
                    &header,
                    UnifiedComment::to_row,
                )?;
                Ok(written)
            }
            SaveOption::Xlsx => {
                let written = self
                    .append_unique_comments_xlsx(
                        cancel,
                        note_key,
                        comments,
                        UnifiedComment::key,
                        &header,
                        UnifiedComment::to_row,
                    )
                    .await?;
                self.append_unique_global_comments_xlsx(
                    cancel,
                    comments,
                    UnifiedComment::key,
                    &header,
                    UnifiedComment::to_row,
                )?;
                Ok(written)
            }
            SaveOption::XlsxBook => {
                let written = self
                    .append_unique_comments_jsonl(cancel, note_key, comments, UnifiedComment::key)
                    .await?;
                self.append_book_comments(cancel, comments)?;
                Ok(written)
            }
        }
    }

    fn lock_global_comments(&self) -> MutexGuard<'_, ()> {
        self.global_comments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn append_book_row(&self, sheet: &str, key: &str, payload: &Value) -> Result<(), StoreError> {
        let Some(book) = &self.book else {
            return Ok(());
        };
        let (header, row) = tabular(payload);
        book.append_unique_rows(sheet, &[key], |k| (*k).to_string(), &header, |_| row.clone())?;
        Ok(())
    }

    async fn mirror_comments<T, K>(
        &self,
        dir: &Path,
        note_key: &str,
        items: &[T],
        key_of: &K,
    ) -> Result<(), StoreError>
    where
        T: Serialize,
        K: Fn(&T) -> String,
    {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let comment_id = key_of(item).trim().to_string();
            if comment_id.is_empty() {
                continue;
            }
            rows.push(MirrorComment {
                comment_id,
                data_json: to_json(dir, item)?,
            });
        }
        mirror
            .insert_comments(&self.platform, entity_key(note_key)?, &rows, unix_now())
            .await
    }
}

fn write_pretty_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let mut body = serde_json::to_string_pretty(value).map_err(|e| StoreError::encode(path, e))?;
    body.push('\n');
    std::fs::write(path, body).map_err(|e| StoreError::io(path, e))
}
