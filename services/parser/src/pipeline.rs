//! Run orchestration.
//!
//! Responsibilities:
//! - Discover source files under the input directory
//! - Read, map and normalize each file independently
//! - Merge every file's rows into one consolidation
//! - Aggregate the clean rows
//! - Enforce the fatal rules (no input files, no consolidated rows)
//!
//! A failing file is reported and skipped; it never stops the run.

use crate::aggregate::{aggregate, AggregatedBucket};
use crate::columns::{map_columns, ColumnMapping, SemanticField};
use crate::consolidate::{Consolidated, Consolidator};
use crate::error::{PipelineError, Result, SourceError};
use crate::normalize::{CanonicalRow, RowNormalizer};
use crate::registry::Registry;
use crate::source::{discover_files, read_table, DecodeAttempt};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Processed,
    Skipped,
    Error,
}

/// What happened to one discovered file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Path relative to the input directory.
    pub source_file: String,
    pub status: FileStatus,
    pub rows_read: usize,
    pub rows_emitted: usize,
    /// Rows that failed the claims-expense predicate.
    pub rows_excluded: usize,
    pub columns: Option<ColumnMapping>,
    pub encoding: Option<&'static str>,
    pub delimiter: Option<char>,
    pub failed_decodes: Vec<DecodeAttempt>,
    pub malformed_records: usize,
    pub error: Option<String>,
}

impl FileReport {
    fn new(source_file: String, status: FileStatus) -> Self {
        Self {
            source_file,
            status,
            rows_read: 0,
            rows_emitted: 0,
            rows_excluded: 0,
            columns: None,
            encoding: None,
            delimiter: None,
            failed_decodes: Vec::new(),
            malformed_records: 0,
            error: None,
        }
    }
}

/// Per-stage file and row counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
    pub rows_emitted: usize,
    pub rows_excluded: usize,
}

impl StageCounts {
    fn record(&mut self, report: &FileReport) {
        self.discovered += 1;
        match report.status {
            FileStatus::Processed => self.processed += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Error => self.errored += 1,
        }
        self.rows_emitted += report.rows_emitted;
        self.rows_excluded += report.rows_excluded;
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub consolidated: Consolidated,
    pub aggregated: Vec<AggregatedBucket>,
    pub files: Vec<FileReport>,
    pub stages: StageCounts,
    pub registry_entries: Option<usize>,
}

fn relative_name(path: &Path, input_dir: &Path) -> String {
    path.strip_prefix(input_dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Read and normalize one file.
///
/// Files with no header row are skipped; any other read failure is an
/// error entry. Neither aborts the run.
pub fn process_file(
    path: &Path,
    input_dir: &Path,
    registry: Option<&Registry>,
) -> (FileReport, Vec<CanonicalRow>) {
    let name = relative_name(path, input_dir);

    let table = match read_table(path) {
        Ok(table) => table,
        Err(e @ SourceError::Empty { .. }) => {
            let mut report = FileReport::new(name, FileStatus::Skipped);
            report.error = Some(e.to_string());
            return (report, Vec::new());
        }
        Err(e) => {
            warn!(file = %name, error = %e, "failed to read source file");
            let mut report = FileReport::new(name, FileStatus::Error);
            report.error = Some(e.to_string());
            return (report, Vec::new());
        }
    };

    let mapping = map_columns(&table.headers);
    debug!(file = %name, mapping = ?mapping, "columns mapped");
    if !mapping.is_mapped(SemanticField::ExpenseValue) {
        warn!(file = %name, headers = ?table.headers, "no expense value column found");
    }

    let normalizer = RowNormalizer::new(&mapping, registry, &name);
    let mut rows = Vec::new();
    let mut excluded = 0;
    for raw in &table.rows {
        match normalizer.normalize(raw) {
            Some(row) => rows.push(row),
            None => excluded += 1,
        }
    }

    let mut report = FileReport::new(name, FileStatus::Processed);
    report.rows_read = table.rows.len();
    report.rows_emitted = rows.len();
    report.rows_excluded = excluded;
    report.columns = Some(mapping);
    report.encoding = table.encoding;
    report.delimiter = table.delimiter;
    report.failed_decodes = table.failed_decodes;
    report.malformed_records = table.malformed_records;

    info!(
        file = %report.source_file,
        rows = report.rows_emitted,
        excluded = report.rows_excluded,
        "processed"
    );
    (report, rows)
}

/// Process every file under `input_dir`, consolidate and aggregate.
pub fn run(input_dir: &Path, registry: Option<&Registry>) -> Result<RunOutput> {
    if !input_dir.is_dir() {
        return Err(PipelineError::MissingInputDir(input_dir.to_path_buf()));
    }

    let discovered = discover_files(input_dir)?;
    if discovered.supported.is_empty() {
        return Err(PipelineError::NoInputFiles(input_dir.to_path_buf()));
    }
    info!(
        files = discovered.supported.len(),
        unsupported = discovered.unsupported.len(),
        "discovered source files"
    );

    let mut files = Vec::new();
    let mut stages = StageCounts::default();
    let mut consolidator = Consolidator::new();

    for path in &discovered.unsupported {
        let report = FileReport::new(relative_name(path, input_dir), FileStatus::Skipped);
        debug!(file = %report.source_file, "unsupported extension, skipped");
        stages.record(&report);
        files.push(report);
    }

    for path in &discovered.supported {
        let (report, rows) = process_file(path, input_dir, registry);
        stages.record(&report);
        files.push(report);
        consolidator.extend(rows);
    }

    if consolidator.is_empty() {
        return Err(PipelineError::NoRows {
            files: stages.processed,
        });
    }

    let consolidated = consolidator.finish();
    let aggregated = aggregate(consolidated.clean_rows());
    info!(
        rows = consolidated.rows.len(),
        flagged = consolidated.ledger.entries.len(),
        groups = aggregated.len(),
        "run complete"
    );

    Ok(RunOutput {
        consolidated,
        aggregated,
        files,
        stages,
        registry_entries: registry.map(Registry::len),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::Issue;
    use crate::registry::RegistryEntry;
    use std::fs;

    const HEADER: &str = "cnpj;razao_social;valor_despesas;descricao;competencia\n";

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    // -------------------------------------------------------------------------
    // END TO END
    // -------------------------------------------------------------------------

    #[test]
    fn test_single_file_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "1T2023.csv",
            &format!(
                "{HEADER}12345678000195;Empresa Teste;1500,00;DESPESA COM EVENTOS/SINISTROS;2023-05\n\
                 12345678000195;Empresa Teste;99,00;RECEITA DE CONTRAPRESTACOES;2023-05\n"
            ),
        );

        let out = run(dir.path(), None).unwrap();
        assert_eq!(out.consolidated.rows.len(), 1);

        let row = &out.consolidated.rows[0];
        assert_eq!(row.identifier, "12345678000195");
        assert_eq!(row.legal_name, "EMPRESA TESTE");
        assert_eq!(row.expense_value, Some(1500.0));
        assert_eq!((row.year, row.quarter), (Some(2023), Some(2)));
        assert!(row.issues.is_empty());
        assert_eq!(row.source_file, "1T2023.csv");

        assert_eq!(out.stages.processed, 1);
        assert_eq!(out.stages.rows_excluded, 1);
        assert_eq!(out.aggregated.len(), 1);
        assert_eq!(out.aggregated[0].total_cents, 150000);
    }

    #[test]
    fn test_large_amounts_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "1T2023.csv",
            &format!(
                "{HEADER}12345678000195;Empresa Teste;1e20;DESPESA COM EVENTOS;2023-01\n\
                 12345678000195;Empresa Teste;1e20;DESPESA COM EVENTOS;2023-04\n\
                 11222333000181;Outra;1e17;DESPESA COM EVENTOS;2023-01\n\
                 33000167000101;Enorme;1e40;DESPESA COM EVENTOS;2023-01\n"
            ),
        );

        let out = run(dir.path(), None).unwrap();
        assert_eq!(out.consolidated.rows.len(), 4);
        assert_eq!(out.consolidated.ledger.count(Issue::InvalidExpenseValue), 1);

        assert_eq!(out.aggregated.len(), 2);
        assert_eq!(out.aggregated[0].total_expense(), 2e20);
        assert_eq!(out.aggregated[1].total_expense(), 1e17);
    }

    #[test]
    fn test_collision_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a/1T.csv",
            &format!("{HEADER}11222333000181;A CORP;10,00;DESPESA COM EVENTOS;2023-01\n"),
        );
        write(
            dir.path(),
            "b/2T.csv",
            &format!("{HEADER}11222333000181;B CORP;20,00;DESPESA COM EVENTOS;2023-04\n"),
        );

        let out = run(dir.path(), None).unwrap();
        assert_eq!(out.consolidated.rows.len(), 2);
        assert!(out
            .consolidated
            .rows
            .iter()
            .all(|r| r.issues.contains(&Issue::IdentifierNameCollision)));
        assert!(out.aggregated.is_empty());
        assert_eq!(out.consolidated.ledger.entries[0].source_file, "a/1T.csv");
    }

    #[test]
    fn test_registry_enrichment_reaches_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "1T2023.csv",
            "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_INICIAL;VL_SALDO_FINAL\n\
             2023-01-01;123456;41;DESPESAS COM EVENTOS / SINISTROS;0;2.500,10\n",
        );
        let registry = Registry::from_entries(vec![RegistryEntry {
            registry_id: "123456".to_string(),
            identifier: "11444777000161".to_string(),
            legal_name: "Operadora Exemplo".to_string(),
            region: "MG".to_string(),
            ..Default::default()
        }]);

        let out = run(dir.path(), Some(&registry)).unwrap();
        let row = &out.consolidated.rows[0];
        assert_eq!(row.identifier, "11444777000161");
        assert!(row.issues.is_empty(), "unexpected issues: {}", row.issue_list());
        assert_eq!(out.aggregated[0].region, "MG");
        assert_eq!(out.aggregated[0].legal_name, "OPERADORA EXEMPLO");
        assert_eq!(out.registry_entries, Some(1));
    }

    // -------------------------------------------------------------------------
    // FILE-LEVEL OUTCOMES
    // -------------------------------------------------------------------------

    #[test]
    fn test_bad_files_do_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "good.csv",
            &format!("{HEADER}12345678000195;X;1,00;DESPESA COM EVENTOS;2023-01\n"),
        );
        write(dir.path(), "empty.csv", "");
        write(dir.path(), "broken.xlsx", "not a workbook");
        write(dir.path(), "readme.md", "notes");

        let out = run(dir.path(), None).unwrap();
        assert_eq!(out.stages.discovered, 4);
        assert_eq!(out.stages.processed, 1);
        assert_eq!(out.stages.skipped, 2);
        assert_eq!(out.stages.errored, 1);

        let broken = out.files.iter().find(|f| f.source_file == "broken.xlsx").unwrap();
        assert_eq!(broken.status, FileStatus::Error);
        assert!(broken.error.is_some());
    }

    // -------------------------------------------------------------------------
    // FATAL RULES
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_input_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&dir.path().join("nope"), None).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInputDir(_)));
    }

    #[test]
    fn test_no_input_files_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "notes.md", "x");
        let err = run(dir.path(), None).unwrap_err();
        assert!(matches!(err, PipelineError::NoInputFiles(_)));
    }

    #[test]
    fn test_zero_rows_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "receitas.csv",
            &format!("{HEADER}12345678000195;X;1,00;RECEITAS;2023-01\n"),
        );
        let err = run(dir.path(), None).unwrap_err();
        assert!(matches!(err, PipelineError::NoRows { files: 1 }));
    }
}
