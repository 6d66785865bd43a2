//! Error types for the expense pipeline.
//!
//! Row-level anomalies are never errors; they travel as issue tags on the
//! canonical row. The enums here cover the file, registry and run levels.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to read one source file. The run records it and moves on.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("workbook error in {path}: {message}")]
    Workbook { path: PathBuf, message: String },

    #[error("{path} has no header row")]
    Empty { path: PathBuf },

    #[error("unsupported file extension: {path}")]
    Unsupported { path: PathBuf },
}

/// Failure to load the operator registry. Always degraded to "no registry".
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry source error: {0}")]
    Source(#[from] SourceError),

    #[error("registry fetch failed: {0}")]
    Fetch(#[from] ans_collector::FetchError),

    #[error("registry {path} has no registry-id column (headers: {headers:?})")]
    MissingKeyColumn { path: PathBuf, headers: Vec<String> },
}

/// Unrecoverable run failures. The binary exits non-zero on any of these.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input directory not found: {0}")]
    MissingInputDir(PathBuf),

    #[error("failed to scan input directory: {0}")]
    Discovery(#[from] SourceError),

    #[error("no supported source files found under {0}")]
    NoInputFiles(PathBuf),

    #[error("no rows consolidated from {files} processed file(s)")]
    NoRows { files: usize },

    #[error("failed to write {path}: {message}")]
    Output { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
