//! Workbook read/rewrite helpers.
//!
//! `rust_xlsxwriter` cannot edit an existing file, so every mutation reads the
//! workbook with `calamine`, changes the in-memory sheets and writes the whole
//! workbook to a temporary file that is then renamed over the original. All
//! mutations in the process go through [`XLSX_LOCK`].

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use calamine::{Data, Reader, Xlsx, XlsxError, open_workbook};
use rust_xlsxwriter::{Color, Format, Workbook};
use tracing::debug;

use super::StoreError;
use super::append::{append_index, create_dir, load_index, same_header, select_new};

/// Serializes every workbook read-modify-write in the process.
pub(crate) static XLSX_LOCK: Mutex<()> = Mutex::new(());

/// Longest string a single xlsx cell accepts.
pub const MAX_CELL_CHARS: usize = 32_767;

const MIN_COLUMN_WIDTH: usize = 10;
const MAX_COLUMN_WIDTH: usize = 60;

/// One sheet held in memory. `rows[0]` is the header when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetData {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl SheetData {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }
}

/// Reads every sheet of `path`. A missing file yields no sheets.
///
/// # Errors
///
/// Returns [`StoreError::XlsxRead`] when the file exists but cannot be parsed.
pub fn read_workbook(path: &Path) -> Result<Vec<SheetData>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let read_err = |reason: String| StoreError::XlsxRead {
        path: path.to_path_buf(),
        reason,
    };
    let mut workbook: Xlsx<BufReader<File>> =
        open_workbook(path).map_err(|e: XlsxError| read_err(e.to_string()))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| read_err(e.to_string()))?;
        let rows = range
            .rows()
            .map(|row| {
                let mut cells: Vec<String> = row.iter().map(data_text).collect();
                while cells.last().is_some_and(String::is_empty) {
                    cells.pop();
                }
                cells
            })
            .collect();
        sheets.push(SheetData { name, rows });
    }
    Ok(sheets)
}

/// Writes `sheets` to `path` through a temporary file and rename.
///
/// Header rows are bold on a dark fill and frozen; column widths follow the
/// longest cell, clamped to 10..=60 characters.
///
/// # Errors
///
/// Returns [`StoreError::XlsxWrite`] or [`StoreError::Io`].
pub fn write_workbook(path: &Path, sheets: &[SheetData]) -> Result<(), StoreError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x001F_4E79));

    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.name)
            .map_err(|e| StoreError::xlsx_write(path, e))?;

        let mut widths: Vec<usize> = Vec::new();
        for (r, row) in sheet.rows.iter().enumerate() {
            let r = u32::try_from(r).map_err(|_| too_large(path))?;
            for (c, cell) in row.iter().enumerate() {
                let c = u16::try_from(c).map_err(|_| too_large(path))?;
                let text = clip_cell(cell);
                let result = if r == 0 {
                    worksheet.write_string_with_format(r, c, text, &header_format)
                } else {
                    worksheet.write_string(r, c, text)
                };
                result.map_err(|e| StoreError::xlsx_write(path, e))?;

                let idx = usize::from(c);
                if widths.len() <= idx {
                    widths.resize(idx + 1, 0);
                }
                widths[idx] = widths[idx].max(text.chars().count());
            }
        }

        if !sheet.rows.is_empty() {
            worksheet
                .set_freeze_panes(1, 0)
                .map_err(|e| StoreError::xlsx_write(path, e))?;
        }
        for (c, chars) in widths.iter().enumerate() {
            let c = u16::try_from(c).map_err(|_| too_large(path))?;
            let width = (chars + 2).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
            worksheet
                .set_column_width(c, u32::try_from(width).unwrap_or(60))
                .map_err(|e| StoreError::xlsx_write(path, e))?;
        }
    }

    let tmp = temp_path(path);
    workbook
        .save(&tmp)
        .map_err(|e| StoreError::xlsx_write(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

/// Appends `rows` to `sheet` in the workbook at `path`, writing `header`
/// first when the sheet is new or empty. Sheets named in `ensure` are created
/// (empty) when missing.
///
/// # Errors
///
/// Returns [`StoreError::XlsxHeaderMismatch`] when the sheet already has a
/// different header row, or a read/write error.
pub fn append_rows(
    path: &Path,
    ensure: &[&str],
    sheet: &str,
    header: &[String],
    rows: Vec<Vec<String>>,
) -> Result<(), StoreError> {
    let _guard = XLSX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    let mut sheets = read_workbook(path)?;
    for name in ensure.iter().copied().chain(std::iter::once(sheet)) {
        if !sheets.iter().any(|s| s.name == name) {
            sheets.push(SheetData::new(name));
        }
    }
    let Some(target) = sheets.iter_mut().find(|s| s.name == sheet) else {
        return Err(StoreError::XlsxHeaderMismatch {
            sheet: sheet.to_string(),
        });
    };
    match target.header() {
        None => target.rows.push(header.to_vec()),
        Some(existing) if !same_header(existing, header) => {
            return Err(StoreError::XlsxHeaderMismatch {
                sheet: sheet.to_string(),
            });
        }
        Some(_) => {}
    }
    let added = rows.len();
    target.rows.extend(rows);

    write_workbook(path, &sheets)?;
    debug!(path = %path.display(), sheet, added, "appended xlsx rows");
    Ok(())
}

/// Overwrites `path` with a single-sheet workbook of `header` plus `rows`.
///
/// # Errors
///
/// Returns a write error.
pub fn write_single_sheet(
    path: &Path,
    header: &[String],
    rows: &[Vec<String>],
) -> Result<(), StoreError> {
    let _guard = XLSX_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let mut sheet = SheetData::new("Sheet1");
    sheet.rows.push(header.to_vec());
    sheet.rows.extend(rows.iter().cloned());
    write_workbook(path, &[sheet])
}

/// Append-unique rows into the first sheet of `dir/data_file`.
///
/// # Errors
///
/// Returns [`StoreError`] on I/O failure or header mismatch.
#[allow(clippy::too_many_arguments)]
pub fn append_unique_xlsx<T, K, R>(
    dir: &Path,
    data_file: &str,
    index_file: &str,
    items: &[T],
    key_of: K,
    sheet: &str,
    header: &[&str],
    row_of: R,
) -> Result<usize, StoreError>
where
    K: Fn(&T) -> String,
    R: Fn(&T) -> Vec<String>,
{
    create_dir(dir)?;
    let index_path = dir.join(index_file);
    let (fresh, keys) = select_new(&load_index(&index_path)?, items, key_of);
    if fresh.is_empty() {
        return Ok(0);
    }
    let header: Vec<String> = header.iter().map(|h| (*h).to_string()).collect();
    let rows = fresh.iter().map(|item| row_of(item)).collect();
    append_rows(&dir.join(data_file), &[], sheet, &header, rows)?;
    append_index(&index_path, &keys)?;
    Ok(fresh.len())
}

fn data_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        other => other.to_string(),
    }
}

fn clip_cell(cell: &str) -> &str {
    match cell.char_indices().nth(MAX_CELL_CHARS) {
        Some((idx, _)) => &cell[..idx],
        None => cell,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn too_large(path: &Path) -> StoreError {
    StoreError::XlsxRead {
        path: path.to_path_buf(),
        reason: "sheet exceeds xlsx row or column limits".to_string(),
    }
}
