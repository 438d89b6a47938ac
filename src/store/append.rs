//! Append-unique writes: a data file plus a sidecar index of keys already
//! written.
//!
//! Every write reads the index, drops items whose key is blank or already
//! present (including repeats within the same batch), appends the rest to the
//! data file and only then appends their keys to the index. A crash between
//! the two appends leaves the index shorter than the body, which readers
//! tolerate.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::StoreError;

/// UTF-8 byte order mark written at the start of every CSV file.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads the key set of an index file. A missing file is an empty set.
///
/// # Errors
///
/// Returns [`StoreError::Io`] for read failures other than not-found.
pub fn load_index(path: &Path) -> Result<HashSet<String>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect())
}

/// Appends keys, one per line. A partial trailing line left by an earlier
/// crash is terminated first so the new keys start on their own lines.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on write failure.
pub fn append_index(path: &Path, keys: &[String]) -> Result<(), StoreError> {
    if keys.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    if needs_leading_newline(path).map_err(|e| StoreError::io(path, e))? {
        buf.push('\n');
    }
    for key in keys {
        buf.push_str(key);
        buf.push('\n');
    }
    let mut file = open_append(path)?;
    file.write_all(buf.as_bytes())
        .map_err(|e| StoreError::io(path, e))
}

/// Appends items as JSON lines.
///
/// # Errors
///
/// Returns [`StoreError`] on I/O or encoding failure.
pub fn append_unique_jsonl<T, K>(
    dir: &Path,
    data_file: &str,
    index_file: &str,
    items: &[T],
    key_of: K,
) -> Result<usize, StoreError>
where
    T: Serialize,
    K: Fn(&T) -> String,
{
    create_dir(dir)?;
    let index_path = dir.join(index_file);
    let data_path = dir.join(data_file);
    let (fresh, keys) = select_new(&load_index(&index_path)?, items, key_of);
    if fresh.is_empty() {
        return Ok(0);
    }

    let mut body = String::new();
    if needs_leading_newline(&data_path).map_err(|e| StoreError::io(&data_path, e))? {
        body.push('\n');
    }
    for item in &fresh {
        let line = serde_json::to_string(item).map_err(|e| StoreError::encode(&data_path, e))?;
        body.push_str(&line);
        body.push('\n');
    }
    let mut file = open_append(&data_path)?;
    file.write_all(body.as_bytes())
        .map_err(|e| StoreError::io(&data_path, e))?;

    append_index(&index_path, &keys)?;
    debug!(path = %data_path.display(), written = fresh.len(), "appended jsonl records");
    Ok(fresh.len())
}

/// Appends items as CSV rows. A new file gets a BOM and `header`; an
/// existing file must already carry exactly `header`.
///
/// # Errors
///
/// Returns [`StoreError::CsvHeaderMismatch`] when the header differs, or an
/// I/O / CSV error.
pub fn append_unique_csv<T, K, R>(
    dir: &Path,
    data_file: &str,
    index_file: &str,
    items: &[T],
    key_of: K,
    header: &[&str],
    row_of: R,
) -> Result<usize, StoreError>
where
    K: Fn(&T) -> String,
    R: Fn(&T) -> Vec<String>,
{
    create_dir(dir)?;
    let index_path = dir.join(index_file);
    let data_path = dir.join(data_file);
    let (fresh, keys) = select_new(&load_index(&index_path)?, items, key_of);
    if fresh.is_empty() {
        return Ok(0);
    }

    let existing_header = read_csv_header(&data_path)?;
    if let Some(existing) = &existing_header
        && !same_header(existing, header)
    {
        return Err(StoreError::CsvHeaderMismatch { path: data_path });
    }

    let mut file = open_append(&data_path)?;
    if existing_header.is_none() {
        file.write_all(UTF8_BOM)
            .map_err(|e| StoreError::io(&data_path, e))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    if existing_header.is_none() {
        writer
            .write_record(header)
            .map_err(|e| StoreError::csv(&data_path, e))?;
    }
    for item in &fresh {
        writer
            .write_record(row_of(item))
            .map_err(|e| StoreError::csv(&data_path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(&data_path, e))?;

    append_index(&index_path, &keys)?;
    debug!(path = %data_path.display(), written = fresh.len(), "appended csv rows");
    Ok(fresh.len())
}

/// Writes a complete CSV file (BOM, header, rows), replacing any previous
/// content.
///
/// # Errors
///
/// Returns an I/O or CSV error.
pub fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<(), StoreError> {
    let mut file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    file.write_all(UTF8_BOM).map_err(|e| StoreError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    writer
        .write_record(header)
        .map_err(|e| StoreError::csv(path, e))?;
    for row in rows {
        writer.write_record(row).map_err(|e| StoreError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}

/// Flattens a JSON payload into a header and one row.
///
/// Objects become sorted top-level keys with scalar cells and nested values
/// as JSON text; anything else becomes a single `json` column.
#[must_use]
pub fn tabular(value: &Value) -> (Vec<String>, Vec<String>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let row = keys.iter().map(|k| cell_text(&map[k.as_str()])).collect();
            (keys.into_iter().cloned().collect(), row)
        }
        other => (vec!["json".to_string()], vec![other.to_string()]),
    }
}

/// Renders one JSON value as a cell.
#[must_use]
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn same_header<A: AsRef<str>, B: AsRef<str>>(existing: &[A], header: &[B]) -> bool {
    existing.len() == header.len()
        && existing
            .iter()
            .zip(header)
            .all(|(a, b)| a.as_ref() == b.as_ref())
}

/// Splits `items` into those whose trimmed key is non-blank and not yet
/// seen, together with their keys.
pub(crate) fn select_new<'a, T, K>(
    seen: &HashSet<String>,
    items: &'a [T],
    key_of: K,
) -> (Vec<&'a T>, Vec<String>)
where
    K: Fn(&T) -> String,
{
    let mut batch: HashSet<String> = HashSet::new();
    let mut fresh = Vec::new();
    let mut keys = Vec::new();
    for item in items {
        let key = key_of(item).trim().to_string();
        if key.is_empty() || seen.contains(&key) || !batch.insert(key.clone()) {
            continue;
        }
        fresh.push(item);
        keys.push(key);
    }
    (fresh, keys)
}

pub(crate) fn create_dir(dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))
}

fn needs_leading_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn read_csv_header(path: &Path) -> Result<Option<Vec<String>>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .map_err(|e| StoreError::io(path, e))?;
    let first = first.trim_start_matches('\u{feff}');
    if first.trim().is_empty() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(first.as_bytes());
    let mut record = csv::StringRecord::new();
    reader
        .read_record(&mut record)
        .map_err(|e| StoreError::csv(path, e))?;
    Ok(Some(record.iter().map(str::to_string).collect()))
}
