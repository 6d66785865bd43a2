//! Output files.
//!
//! Every CSV writes its header explicitly so an empty table still carries
//! the full column schema. Readers are used by the API to load a finished
//! run back.

use crate::aggregate::AggregatedBucket;
use crate::error::{PipelineError, Result};
use crate::normalize::CanonicalRow;
use crate::number::format_amount;
use crate::pipeline::{FileReport, RunOutput, StageCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONSOLIDATED_FILE: &str = "consolidated_expenses.csv";
pub const ISSUES_FILE: &str = "consolidated_issues.csv";
pub const ISSUE_SUMMARY_FILE: &str = "issue_summary.json";
pub const AGGREGATED_FILE: &str = "aggregated_expenses.csv";
pub const MANIFEST_FILE: &str = "process_manifest.json";

pub const CANONICAL_HEADERS: [&str; 5] =
    ["identifier", "legal_name", "quarter", "year", "expense_value"];

pub const ISSUE_HEADERS: [&str; 7] = [
    "identifier",
    "legal_name",
    "quarter",
    "year",
    "expense_value",
    "issues",
    "source_file",
];

pub const AGGREGATED_HEADERS: [&str; 5] = [
    "legal_name",
    "region",
    "total_expense",
    "mean_period_expense",
    "stddev_period_expense",
];

fn amount<S: Serializer>(value: &Option<f64>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_amount(*value))
}

fn required_amount<S: Serializer>(value: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format_amount(Some(*value)))
}

/// One line of `consolidated_expenses.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub identifier: String,
    pub legal_name: String,
    pub quarter: Option<u8>,
    pub year: Option<i32>,
    #[serde(serialize_with = "amount")]
    pub expense_value: Option<f64>,
}

impl From<&CanonicalRow> for CanonicalRecord {
    fn from(row: &CanonicalRow) -> Self {
        Self {
            identifier: row.identifier.clone(),
            legal_name: row.legal_name.clone(),
            quarter: row.quarter,
            year: row.year,
            expense_value: row.expense_value,
        }
    }
}

impl From<CanonicalRecord> for CanonicalRow {
    fn from(record: CanonicalRecord) -> Self {
        Self {
            identifier: record.identifier,
            legal_name: record.legal_name,
            quarter: record.quarter,
            year: record.year,
            expense_value: record.expense_value,
            ..Default::default()
        }
    }
}

/// One line of `consolidated_issues.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRecord {
    pub identifier: String,
    pub legal_name: String,
    pub quarter: Option<u8>,
    pub year: Option<i32>,
    #[serde(serialize_with = "amount")]
    pub expense_value: Option<f64>,
    pub issues: String,
    pub source_file: String,
}

impl From<&CanonicalRow> for IssueRecord {
    fn from(row: &CanonicalRow) -> Self {
        Self {
            identifier: row.identifier.clone(),
            legal_name: row.legal_name.clone(),
            quarter: row.quarter,
            year: row.year,
            expense_value: row.expense_value,
            issues: row.issue_list(),
            source_file: row.source_file.clone(),
        }
    }
}

/// One line of `aggregated_expenses.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub legal_name: String,
    pub region: String,
    #[serde(serialize_with = "required_amount")]
    pub total_expense: f64,
    #[serde(serialize_with = "required_amount")]
    pub mean_period_expense: f64,
    #[serde(serialize_with = "amount")]
    pub stddev_period_expense: Option<f64>,
}

impl From<&AggregatedBucket> for AggregatedRecord {
    fn from(bucket: &AggregatedBucket) -> Self {
        Self {
            legal_name: bucket.legal_name.clone(),
            region: bucket.region.clone(),
            total_expense: bucket.total_expense(),
            mean_period_expense: bucket.mean_period_expense,
            stddev_period_expense: bucket.stddev_period_expense,
        }
    }
}

/// `process_manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessManifest {
    pub generated_at: DateTime<Utc>,
    pub input_dir: String,
    pub output_dir: String,
    pub registry_entries: Option<usize>,
    pub summary: StageCounts,
    pub issue_counts: BTreeMap<&'static str, usize>,
    pub errors: Vec<ManifestError>,
    pub entries: Vec<FileReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestError {
    pub file: String,
    pub error: String,
}

impl ProcessManifest {
    pub fn new(run: &RunOutput, input_dir: &Path, output_dir: &Path) -> Self {
        let errors = run
            .files
            .iter()
            .filter_map(|f| {
                f.error.as_ref().map(|e| ManifestError {
                    file: f.source_file.clone(),
                    error: e.clone(),
                })
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            input_dir: input_dir.display().to_string(),
            output_dir: output_dir.display().to_string(),
            registry_entries: run.registry_entries,
            summary: run.stages.clone(),
            issue_counts: run.consolidated.ledger.summary(),
            errors,
            entries: run.files.clone(),
        }
    }
}

fn output_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Output {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Write a header row followed by serialized records.
pub fn write_csv<T: Serialize>(path: &Path, headers: &[&str], records: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| output_error(path, e))?;
    writer.write_record(headers).map_err(|e| output_error(path, e))?;
    for record in records {
        writer.serialize(record).map_err(|e| output_error(path, e))?;
    }
    writer.flush().map_err(|e| output_error(path, e))?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| output_error(path, e))?;
    fs::write(path, json).map_err(|e| output_error(path, e))
}

/// Paths written by `write_all`.
#[derive(Debug, Clone)]
pub struct WrittenOutputs {
    pub consolidated: PathBuf,
    pub issues: PathBuf,
    pub issue_summary: PathBuf,
    pub aggregated: PathBuf,
    pub manifest: PathBuf,
}

/// Write every output of a finished run under `output_dir`.
pub fn write_all(run: &RunOutput, input_dir: &Path, output_dir: &Path) -> Result<WrittenOutputs> {
    fs::create_dir_all(output_dir).map_err(|e| output_error(output_dir, e))?;

    let out = WrittenOutputs {
        consolidated: output_dir.join(CONSOLIDATED_FILE),
        issues: output_dir.join(ISSUES_FILE),
        issue_summary: output_dir.join(ISSUE_SUMMARY_FILE),
        aggregated: output_dir.join(AGGREGATED_FILE),
        manifest: output_dir.join(MANIFEST_FILE),
    };

    let canonical: Vec<CanonicalRecord> =
        run.consolidated.rows.iter().map(CanonicalRecord::from).collect();
    write_csv(&out.consolidated, &CANONICAL_HEADERS, &canonical)?;

    let issues: Vec<IssueRecord> =
        run.consolidated.ledger.entries.iter().map(IssueRecord::from).collect();
    write_csv(&out.issues, &ISSUE_HEADERS, &issues)?;

    write_json(&out.issue_summary, &run.consolidated.ledger.summary())?;

    let aggregated: Vec<AggregatedRecord> = run.aggregated.iter().map(AggregatedRecord::from).collect();
    write_csv(&out.aggregated, &AGGREGATED_HEADERS, &aggregated)?;

    write_json(&out.manifest, &ProcessManifest::new(run, input_dir, output_dir))?;

    Ok(out)
}

fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| output_error(path, e))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| output_error(path, e))
}

pub fn read_canonical(path: &Path) -> Result<Vec<CanonicalRecord>> {
    read_csv(path)
}

pub fn read_aggregated(path: &Path) -> Result<Vec<AggregatedRecord>> {
    read_csv(path)
}
