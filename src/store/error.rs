use std::path::{Path, PathBuf};

use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The job's token fired before the write started.
    #[error("store operation canceled")]
    Canceled,

    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A payload could not be serialized.
    #[error("cannot encode record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// CSV read or write failure.
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// An existing CSV file has a different header.
    #[error("csv header mismatch for {path}")]
    CsvHeaderMismatch { path: PathBuf },

    /// An existing workbook could not be read.
    #[error("cannot read xlsx {path}: {reason}")]
    XlsxRead { path: PathBuf, reason: String },

    /// A workbook could not be written.
    #[error("cannot write xlsx {path}: {source}")]
    XlsxWrite {
        path: PathBuf,
        #[source]
        source: rust_xlsxwriter::XlsxError,
    },

    /// A sheet already has a different header row.
    #[error("xlsx header mismatch for sheet {sheet}")]
    XlsxHeaderMismatch { sheet: String },

    /// Entity key is empty or not filesystem safe.
    #[error("invalid entity key {key:?}")]
    InvalidKey { key: String },

    /// Unknown backend or save option.
    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },

    /// A mirror backend was selected without its connection string.
    #[error("{backend} backend requires {setting}")]
    MissingSetting {
        backend: &'static str,
        setting: &'static str,
    },

    /// Relational mirror failure.
    #[error("{backend} {op} failed: {source}")]
    Sql {
        backend: &'static str,
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Document mirror failure.
    #[error("mongodb {op} failed: {source}")]
    Mongo {
        op: &'static str,
        #[source]
        source: mongodb::error::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn encode(path: &Path, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn xlsx_write(path: &Path, source: rust_xlsxwriter::XlsxError) -> Self {
        Self::XlsxWrite {
            path: path.to_path_buf(),
            source,
        }
    }
}
