//! Per-run multi-sheet workbook used by the `xlsx_book` save option.

use std::path::{Path, PathBuf};

use chrono::Local;

use super::StoreError;
use super::append::{append_index, create_dir, load_index, select_new};
use super::xlsx::append_rows;

pub const CONTENTS_SHEET: &str = "Contents";
pub const COMMENTS_SHEET: &str = "Comments";
pub const CREATORS_SHEET: &str = "Creators";

const BOOK_SHEETS: [&str; 3] = [CONTENTS_SHEET, COMMENTS_SHEET, CREATORS_SHEET];

/// `<platform>_<mode>_<YYYYMMDD_HHMMSS>.xlsx` in the platform directory.
#[derive(Debug, Clone)]
pub struct RunWorkbook {
    dir: PathBuf,
    stem: String,
}

impl RunWorkbook {
    /// Names a workbook for a run started now.
    #[must_use]
    pub fn new(platform_dir: &Path, platform: &str, mode: &str) -> Self {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Self::with_stem(platform_dir, format!("{platform}_{mode}_{stamp}"))
    }

    #[must_use]
    pub fn with_stem(platform_dir: &Path, stem: impl Into<String>) -> Self {
        Self {
            dir: platform_dir.to_path_buf(),
            stem: stem.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.xlsx", self.stem))
    }

    /// Index file tracking keys already written to `sheet`.
    #[must_use]
    pub fn index_path(&self, sheet: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.idx", self.stem, sheet.to_lowercase()))
    }

    /// Appends rows whose keys are new to `sheet`. The standard sheets are
    /// always present in the file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure or header mismatch.
    pub fn append_unique_rows<T, K, R>(
        &self,
        sheet: &str,
        items: &[T],
        key_of: K,
        header: &[String],
        row_of: R,
    ) -> Result<usize, StoreError>
    where
        K: Fn(&T) -> String,
        R: Fn(&T) -> Vec<String>,
    {
        create_dir(&self.dir)?;
        let index_path = self.index_path(sheet);
        let (fresh, keys) = select_new(&load_index(&index_path)?, items, key_of);
        if fresh.is_empty() {
            return Ok(0);
        }
        let rows = fresh.iter().map(|item| row_of(item)).collect();
        append_rows(&self.path(), &BOOK_SHEETS, sheet, header, rows)?;
        append_index(&index_path, &keys)?;
        Ok(fresh.len())
    }
}
