//! Read-only views over the data directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::crawler::unix_now;

const LISTED_EXTENSIONS: [&str; 7] = ["json", "jsonl", "csv", "db", "svg", "png", "xlsx"];

/// Substrings used to attribute a file to a platform in stats.
const PLATFORM_KEYS: [&str; 10] = [
    "xhs", "dy", "ks", "bili", "wb", "tieba", "zhihu", "douyin", "bilibili", "weibo",
];

/// One listed output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFile {
    pub name: String,
    /// Path relative to the data directory, `/` separated.
    pub path: String,
    pub size: u64,
    pub modified_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    #[serde(rename = "type")]
    pub file_type: String,
}

/// Totals over every file under the data directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataStats {
    pub total_files: usize,
    pub total_size: u64,
    pub by_platform: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub generated_at: i64,
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => walk(&path, out),
            Ok(ft) if ft.is_file() => out.push(path),
            _ => {}
        }
    }
}

fn files_under(root: &Path) -> io::Result<Vec<PathBuf>> {
    match fs::metadata(root) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    }
    let mut out = Vec::new();
    walk(root, &mut out);
    Ok(out)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .filter(|e| !e.is_empty())
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

fn modified_at(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or(0)
}

/// Counts records in line-oriented outputs: JSONL lines and CSV data rows.
fn count_records(path: &Path, ext: &str) -> Option<usize> {
    let header_rows = match ext {
        "jsonl" => 0,
        "csv" => 1,
        _ => return None,
    };
    let file = fs::File::open(path).ok()?;
    let lines = BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|l| !l.trim().is_empty())
        .count();
    Some(lines.saturating_sub(header_rows))
}

/// Lists output files, newest first.
///
/// `platform` matches a substring of the relative path and `file_type` an
/// extension, both case-insensitively. A missing data directory lists
/// nothing.
///
/// # Errors
///
/// Returns the I/O error when the data directory cannot be read.
pub fn list_files(root: &Path, platform: &str, file_type: &str) -> io::Result<Vec<DataFile>> {
    let platform = platform.trim().to_lowercase();
    let file_type = file_type.trim().trim_start_matches('.').to_lowercase();

    let mut out = Vec::new();
    for path in files_under(root)? {
        let Some(ext) = extension(&path) else { continue };
        if !LISTED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if !file_type.is_empty() && ext != file_type {
            continue;
        }
        let Some(rel) = relative(root, &path) else { continue };
        if !platform.is_empty() && !rel.to_lowercase().contains(&platform) {
            continue;
        }
        let Ok(meta) = fs::metadata(&path) else { continue };
        out.push(DataFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: rel,
            size: meta.len(),
            modified_at: modified_at(&meta),
            record_count: count_records(&path, &ext),
            file_type: ext,
        });
    }
    out.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.path.cmp(&b.path)));
    Ok(out)
}

/// Aggregates file counts by platform and extension.
///
/// # Errors
///
/// Returns the I/O error when the data directory cannot be read.
pub fn stats(root: &Path) -> io::Result<DataStats> {
    let mut stats = DataStats {
        generated_at: unix_now(),
        ..DataStats::default()
    };
    for path in files_under(root)? {
        let Some(ext) = extension(&path) else { continue };
        let Ok(meta) = fs::metadata(&path) else { continue };
        stats.total_files += 1;
        stats.total_size += meta.len();
        *stats.by_type.entry(ext).or_insert(0) += 1;

        let rel = relative(root, &path).unwrap_or_default().to_lowercase();
        if let Some(key) = PLATFORM_KEYS.iter().find(|k| rel.contains(*k)) {
            *stats.by_platform.entry((*key).to_string()).or_insert(0) += 1;
        }
    }
    Ok(stats)
}

/// Resolves a client-supplied relative path inside `root`.
///
/// Returns `None` for empty, absolute or escaping paths.
#[must_use]
pub fn safe_path(root: &Path, rel: &str) -> Option<PathBuf> {
    if rel.contains('\0') {
        return None;
    }
    let rel = Path::new(rel.trim_start_matches('/'));
    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(clean))
}
