//! Source file discovery and reading.
//!
//! Responsibilities:
//! - Walk the input tree and pick the supported files (csv, txt, xlsx, xls)
//! - Decode text with an explicit, ordered list of encodings
//! - Sniff the delimiter from the header line
//! - Read the first sheet of workbooks
//!
//! Every reader produces the same `SourceTable`: a header plus `RawRow`s.
//! Fallbacks are never silent: each failed decode attempt is kept with its
//! reason so it can be reported.

use crate::error::SourceError;
use crate::normalize::RawRow;
use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt", "xlsx", "xls"];

/// Candidate delimiters, in tie-break order.
pub const DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Encodings tried in order. WINDOWS-1252 is the WHATWG mapping for the
/// `latin1` label and decodes any byte sequence.
const ENCODINGS: &[&Encoding] = &[UTF_8, WINDOWS_1252];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Delimited,
    Workbook,
}

pub fn source_kind(path: &Path) -> Option<SourceKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "csv" | "txt" => Some(SourceKind::Delimited),
        "xlsx" | "xls" => Some(SourceKind::Workbook),
        _ => None,
    }
}

/// Files found under an input directory, sorted by path.
#[derive(Debug, Default)]
pub struct Discovered {
    pub supported: Vec<PathBuf>,
    pub unsupported: Vec<PathBuf>,
}

/// Recursively list files under `dir`. Sorted so runs are reproducible.
pub fn discover_files(dir: &Path) -> Result<Discovered, SourceError> {
    let mut found = Discovered::default();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|source| SourceError::Io {
            path: current.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Io {
                path: current.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if source_kind(&path).is_some() {
                found.supported.push(path);
            } else {
                found.unsupported.push(path);
            }
        }
    }

    found.supported.sort();
    found.unsupported.sort();
    Ok(found)
}

/// One failed decode strategy and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeAttempt {
    pub encoding: &'static str,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub failed_attempts: Vec<DecodeAttempt>,
}

/// Decode bytes with the first encoding that maps them without
/// replacement characters. A UTF-8 BOM is stripped.
pub fn decode_text(bytes: &[u8]) -> DecodedText {
    let mut failed_attempts = Vec::new();

    for encoding in ENCODINGS {
        let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
        if !had_errors {
            return DecodedText {
                text: text.into_owned(),
                encoding: encoding.name(),
                failed_attempts,
            };
        }
        failed_attempts.push(DecodeAttempt {
            encoding: encoding.name(),
            error: "malformed byte sequence".to_string(),
        });
    }

    // WINDOWS-1252 maps every byte, so this is not reached in practice
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: WINDOWS_1252.name(),
        failed_attempts,
    }
}

/// Pick the candidate delimiter occurring most often in the header line.
/// Ties (including no candidate at all) go to the earliest in `DELIMITERS`.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut best = DELIMITERS[0];
    let mut best_count = 0;
    for delimiter in DELIMITERS {
        let count = header_line.bytes().filter(|&b| b == delimiter).count();
        if count > best_count {
            best = delimiter;
            best_count = count;
        }
    }
    best
}

/// A source file read into a header and rows.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Encoding used for text sources.
    pub encoding: Option<&'static str>,
    pub delimiter: Option<char>,
    pub failed_decodes: Vec<DecodeAttempt>,
    /// Records the CSV reader could not parse; skipped, not fatal.
    pub malformed_records: usize,
}

/// Read any supported file.
pub fn read_table(path: &Path) -> Result<SourceTable, SourceError> {
    match source_kind(path) {
        Some(SourceKind::Delimited) => {
            let bytes = fs::read(path).map_err(|source| SourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            read_delimited(&bytes, path)
        }
        Some(SourceKind::Workbook) => read_workbook(path),
        None => Err(SourceError::Unsupported {
            path: path.to_path_buf(),
        }),
    }
}

/// Parse delimited text. `path` is only used for error context.
pub fn read_delimited(bytes: &[u8], path: &Path) -> Result<SourceTable, SourceError> {
    let decoded = decode_text(bytes);
    for attempt in &decoded.failed_attempts {
        debug!(path = %path.display(), encoding = attempt.encoding, error = %attempt.error, "decode attempt failed");
    }

    let first_line = decoded.text.lines().next().unwrap_or("");
    if first_line.trim().is_empty() {
        return Err(SourceError::Empty {
            path: path.to_path_buf(),
        });
    }
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(decoded.text.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(Ok(record)) => record.iter().map(str::to_string).collect(),
        Some(Err(source)) => {
            return Err(SourceError::Csv {
                path: path.to_path_buf(),
                source,
            })
        }
        None => {
            return Err(SourceError::Empty {
                path: path.to_path_buf(),
            })
        }
    };

    let mut rows = Vec::new();
    let mut malformed_records = 0;
    for (line_idx, result) in records.enumerate() {
        match result {
            Ok(record) => rows.push(RawRow::from_record(&headers, record.iter())),
            Err(e) => {
                malformed_records += 1;
                // +2: 1-indexed, plus the header line
                warn!(path = %path.display(), line = line_idx + 2, error = %e, "skipping malformed record");
            }
        }
    }

    Ok(SourceTable {
        headers,
        rows,
        encoding: Some(decoded.encoding),
        delimiter: Some(delimiter as char),
        failed_decodes: decoded.failed_attempts,
        malformed_records,
    })
}

/// Read the first sheet of a workbook; the first row is the header.
pub fn read_workbook(path: &Path) -> Result<SourceTable, SourceError> {
    let workbook_error = |message: String| SourceError::Workbook {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;
    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .ok_or_else(|| workbook_error("workbook has no sheets".to_string()))?;

    debug!(path = %path.display(), sheet = %sheet_name, sheets = sheet_names.len(), "reading first sheet");

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| workbook_error(e.to_string()))?;

    let mut cells = range.rows();
    let headers: Vec<String> = match cells.next() {
        Some(row) => row.iter().map(cell_to_string).collect(),
        None => {
            return Err(SourceError::Empty {
                path: path.to_path_buf(),
            })
        }
    };

    let rows = cells
        .map(|row| RawRow::from_record(&headers, row.iter().map(cell_to_string)))
        .collect();

    Ok(SourceTable {
        headers,
        rows,
        ..Default::default()
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.to_string()),
        Data::DateTimeIso(s) => s.clone(),
        other => format!("{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // DELIMITER SNIFFING
    // -------------------------------------------------------------------------

    #[test]
    fn test_sniff_semicolon() {
        assert_eq!(sniff_delimiter("cnpj;razao_social;valor"), b';');
    }

    #[test]
    fn test_sniff_each_candidate() {
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("a|b|c"), b'|');
    }

    #[test]
    fn test_sniff_tie_goes_to_first_candidate() {
        assert_eq!(sniff_delimiter("a;b,c"), b';');
        assert_eq!(sniff_delimiter("single"), b';');
    }

    // -------------------------------------------------------------------------
    // DECODING
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_utf8_strips_bom() {
        let decoded = decode_text("\u{feff}Razão".as_bytes());
        assert_eq!(decoded.text, "Razão");
        assert_eq!(decoded.encoding, "UTF-8");
        assert!(decoded.failed_attempts.is_empty());
    }

    #[test]
    fn test_decode_latin1_fallback_keeps_reason() {
        // "Razão" in latin-1: ã = 0xE3
        let bytes = b"Raz\xe3o";
        let decoded = decode_text(bytes);
        assert_eq!(decoded.text, "Razão");
        assert_eq!(decoded.encoding, "windows-1252");
        assert_eq!(decoded.failed_attempts.len(), 1);
        assert_eq!(decoded.failed_attempts[0].encoding, "UTF-8");
    }

    // -------------------------------------------------------------------------
    // DELIMITED READING
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_delimited_basic() {
        let text = "cnpj;razao_social;valor\n12345678000195;Empresa;1500,00\n";
        let table = read_delimited(text.as_bytes(), Path::new("t.csv")).unwrap();
        assert_eq!(table.headers, vec!["cnpj", "razao_social", "valor"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("valor"), Some("1500,00"));
        assert_eq!(table.delimiter, Some(';'));
    }

    #[test]
    fn test_read_delimited_quoted_fields_and_trim() {
        let text = "a,b\n\"x, y\",  z \n";
        let table = read_delimited(text.as_bytes(), Path::new("t.csv")).unwrap();
        assert_eq!(table.rows[0].get("a"), Some("x, y"));
        assert_eq!(table.rows[0].get("b"), Some("z"));
    }

    #[test]
    fn test_read_delimited_ragged_rows() {
        let text = "a;b;c\n1;2\n1;2;3;4\n";
        let table = read_delimited(text.as_bytes(), Path::new("t.csv")).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("c"), Some(""));
        assert_eq!(table.rows[1].get("c"), Some("3"));
    }

    #[test]
    fn test_read_delimited_empty_fails() {
        let err = read_delimited(b"", Path::new("empty.csv")).unwrap_err();
        assert!(matches!(err, SourceError::Empty { .. }));
    }

    // -------------------------------------------------------------------------
    // DISCOVERY
    // -------------------------------------------------------------------------

    #[test]
    fn test_source_kind() {
        assert_eq!(source_kind(Path::new("a.CSV")), Some(SourceKind::Delimited));
        assert_eq!(source_kind(Path::new("a.txt")), Some(SourceKind::Delimited));
        assert_eq!(source_kind(Path::new("a.xlsx")), Some(SourceKind::Workbook));
        assert_eq!(source_kind(Path::new("a.zip")), None);
        assert_eq!(source_kind(Path::new("README")), None);
    }

    #[test]
    fn test_discover_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("2023").join("1T");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("b.csv"), "x\n").unwrap();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        fs::write(dir.path().join("notes.md"), "x\n").unwrap();

        let found = discover_files(dir.path()).unwrap();
        assert_eq!(found.supported.len(), 2);
        assert!(found.supported[0].ends_with("2023/1T/b.csv"));
        assert!(found.supported[1].ends_with("a.txt"));
        assert_eq!(found.unsupported.len(), 1);
    }

    #[test]
    fn test_read_table_rejects_unsupported() {
        let err = read_table(Path::new("archive.zip")).unwrap_err();
        assert!(matches!(err, SourceError::Unsupported { .. }));
    }

    // -------------------------------------------------------------------------
    // WORKBOOKS
    // -------------------------------------------------------------------------

    fn write_statement_workbook(path: &Path) {
        use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["CNPJ", "Razao_Social", "Data", "Valor", "Descricao"]
            .iter()
            .enumerate()
        {
            sheet.write_string(0, col as u16, *header).unwrap();
        }

        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        let date = ExcelDateTime::from_ymd(2023, 5, 15).unwrap();
        sheet.write_number(1, 0, 12345678000195.0).unwrap();
        sheet.write_string(1, 1, " Empresa Teste ").unwrap();
        sheet.write_datetime_with_format(1, 2, &date, &date_format).unwrap();
        sheet.write_number(1, 3, 1500.5).unwrap();
        sheet.write_string(1, 4, "DESPESA COM EVENTOS/SINISTROS").unwrap();

        // Second sheet is ignored
        let other = workbook.add_worksheet();
        other.write_string(0, 0, "ignored").unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn test_read_workbook_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1T2023.xlsx");
        write_statement_workbook(&path);

        let table = read_table(&path).unwrap();
        assert_eq!(
            table.headers,
            vec!["CNPJ", "Razao_Social", "Data", "Valor", "Descricao"]
        );
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.encoding, None);
        assert_eq!(table.delimiter, None);

        let row = &table.rows[0];
        assert_eq!(row.get("CNPJ"), Some("12345678000195"));
        assert_eq!(row.get("Razao_Social"), Some("Empresa Teste"));
        assert_eq!(row.get("Data"), Some("2023-05-15"));
        assert_eq!(row.get("Valor"), Some("1500.5"));
    }

    #[test]
    fn test_workbook_row_normalizes() {
        use crate::columns::map_columns;
        use crate::normalize::RowNormalizer;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1T2023.xlsx");
        write_statement_workbook(&path);

        let table = read_table(&path).unwrap();
        let mapping = map_columns(&table.headers);
        let row = RowNormalizer::new(&mapping, None, "1T2023.xlsx")
            .normalize(&table.rows[0])
            .unwrap();

        assert_eq!(row.identifier, "12345678000195");
        assert_eq!(row.legal_name, "EMPRESA TESTE");
        assert_eq!(row.expense_value, Some(1500.5));
        assert_eq!((row.year, row.quarter), (Some(2023), Some(2)));
        assert!(row.issues.is_empty());
    }
}
