//! Row filtering and normalization.
//!
//! This is the boundary between free-shaped source rows (`RawRow`, keyed by
//! whatever the file called its columns) and the fixed `CanonicalRow`
//! schema. Nothing downstream looks at source column names.

use crate::aggregate::to_cents;
use crate::columns::{ColumnMapping, SemanticField};
use crate::identifier::{normalize_identifier, normalize_legal_name, normalize_text};
use crate::issue::Issue;
use crate::number::parse_number;
use crate::period::resolve_period;
use crate::registry::Registry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const EXPENSE_TERMS: &[&str] = &["despesa", "expense"];
const EVENT_TERMS: &[&str] = &["evento", "sinistro", "event", "claim"];

/// One source row, keyed by source column name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    values: BTreeMap<String, String>,
}

impl RawRow {
    /// Zip a header with a record. Short records are padded with empty
    /// values; on duplicate header names the first column wins, matching the
    /// mapper's first-column tie-break.
    pub fn from_record<I, S>(headers: &[String], record: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cells = record.into_iter();
        let mut values = BTreeMap::new();
        for header in headers {
            let value = cells.next().map(Into::into).unwrap_or_default();
            values.entry(header.clone()).or_insert(value);
        }
        RawRow { values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.values().map(String::as_str)
    }
}

/// The normalized unit of record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalRow {
    /// Digits only; may be empty or malformed until validated.
    pub identifier: String,
    /// Uppercase, whitespace-collapsed.
    pub legal_name: String,
    /// Digits only; used for registry lookups.
    pub registry_id: String,
    /// Federative unit from the registry, empty when unknown.
    pub region: String,
    pub year: Option<i32>,
    pub quarter: Option<u8>,
    pub expense_value: Option<f64>,
    pub source_file: String,
    pub issues: BTreeSet<Issue>,
}

impl CanonicalRow {
    /// Add an issue tag. Returns false if the row already carried it.
    pub fn tag(&mut self, issue: Issue) -> bool {
        self.issues.insert(issue)
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Sorted, de-duplicated, comma-joined tags.
    pub fn issue_list(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Domain predicate: an expense ("despesa") with events or claims
/// ("eventos" / "sinistros"). Case-insensitive substring match.
pub fn is_claims_expense(text: &str) -> bool {
    let text = normalize_text(text);
    EXPENSE_TERMS.iter().any(|t| text.contains(t)) && EVENT_TERMS.iter().any(|t| text.contains(t))
}

/// Applies one file's column mapping to its rows.
pub struct RowNormalizer<'a> {
    mapping: &'a ColumnMapping,
    registry: Option<&'a Registry>,
    source_file: &'a str,
}

impl<'a> RowNormalizer<'a> {
    pub fn new(
        mapping: &'a ColumnMapping,
        registry: Option<&'a Registry>,
        source_file: &'a str,
    ) -> Self {
        Self {
            mapping,
            registry,
            source_file,
        }
    }

    /// Normalize one row, or `None` when it fails the domain predicate.
    /// Exclusion is a filter, not an anomaly: excluded rows are not tagged.
    pub fn normalize(&self, row: &RawRow) -> Option<CanonicalRow> {
        if !self.passes_predicate(row) {
            return None;
        }

        let expense_raw = self.field(row, SemanticField::ExpenseValue);
        let period = resolve_period(
            self.mapped(row, SemanticField::Year),
            self.mapped(row, SemanticField::Quarter),
            self.mapped(row, SemanticField::Period),
        );

        let mut canonical = CanonicalRow {
            identifier: normalize_identifier(self.field(row, SemanticField::Identifier)),
            legal_name: normalize_legal_name(self.field(row, SemanticField::LegalName)),
            registry_id: normalize_identifier(self.field(row, SemanticField::RegistryId)),
            region: String::new(),
            year: period.year,
            quarter: period.quarter,
            expense_value: parse_number(expense_raw),
            source_file: self.source_file.to_string(),
            issues: period.issues.into_iter().collect(),
        };

        if let Some(registry) = self.registry {
            registry.cross_reference(&mut canonical);
        }

        // Missing-field tags reflect the row after registry backfill
        if canonical.identifier.is_empty() {
            canonical.tag(Issue::MissingIdentifier);
        }
        if canonical.legal_name.is_empty() {
            canonical.tag(Issue::MissingLegalName);
        }
        match canonical.expense_value {
            None => {
                canonical.tag(Issue::InvalidExpenseValue);
            }
            // Parsed but too large to carry in cents
            Some(v) if to_cents(v).is_none() => {
                canonical.tag(Issue::InvalidExpenseValue);
            }
            Some(v) if v <= 0.0 => {
                canonical.tag(Issue::NonPositiveExpenseValue);
            }
            Some(_) => {}
        }

        Some(canonical)
    }

    fn passes_predicate(&self, row: &RawRow) -> bool {
        match self.mapped(row, SemanticField::Description) {
            Some(description) => is_claims_expense(description),
            None => row.values().any(is_claims_expense),
        }
    }

    fn mapped<'r>(&self, row: &'r RawRow, field: SemanticField) -> Option<&'r str> {
        self.mapping.get(field).and_then(|column| row.get(column))
    }

    fn field<'r>(&self, row: &'r RawRow, field: SemanticField) -> &'r str {
        self.mapped(row, field).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::map_columns;
    use crate::registry::RegistryEntry;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn normalize_one(header: &[&str], record: &[&str]) -> Option<CanonicalRow> {
        let h = headers(header);
        let mapping = map_columns(&h);
        let row = RawRow::from_record(&h, record.iter().copied());
        RowNormalizer::new(&mapping, None, "test.csv").normalize(&row)
    }

    // -------------------------------------------------------------------------
    // PREDICATE
    // -------------------------------------------------------------------------

    #[test]
    fn test_predicate_matches() {
        assert!(is_claims_expense("DESPESA COM EVENTOS/SINISTROS"));
        assert!(is_claims_expense("Despesas com Eventos"));
        assert!(is_claims_expense("despesas de sinistros conhecidos"));
        assert!(is_claims_expense("Claims expense"));
    }

    #[test]
    fn test_predicate_rejects() {
        assert!(!is_claims_expense("DESPESAS ADMINISTRATIVAS"));
        assert!(!is_claims_expense("EVENTOS INDENIZAVEIS"));
        assert!(!is_claims_expense(""));
    }

    #[test]
    fn test_row_without_matching_description_excluded() {
        let out = normalize_one(
            &["cnpj", "razao_social", "valor", "descricao"],
            &["12345678000195", "X", "10,00", "RECEITAS"],
        );
        assert!(out.is_none());
    }

    #[test]
    fn test_empty_mapped_description_excluded() {
        let out = normalize_one(
            &["cnpj", "razao_social", "valor", "descricao"],
            &["12345678000195", "X", "10,00", ""],
        );
        assert!(out.is_none());
    }

    #[test]
    fn test_unmapped_description_checks_every_column() {
        let h = &["cnpj", "razao_social", "valor", "obs"];
        let kept = normalize_one(h, &["12345678000195", "X", "10,00", "despesa com sinistro"]);
        assert!(kept.is_some());

        let dropped = normalize_one(h, &["12345678000195", "X", "10,00", "outros"]);
        assert!(dropped.is_none());
    }

    // -------------------------------------------------------------------------
    // NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_end_to_end_row() {
        let row = normalize_one(
            &["cnpj", "razao_social", "valor_despesas", "descricao", "competencia"],
            &[
                "12345678000195",
                "Empresa Teste",
                "1500,00",
                "DESPESA COM EVENTOS/SINISTROS",
                "2023-05",
            ],
        )
        .unwrap();

        assert_eq!(row.identifier, "12345678000195");
        assert_eq!(row.legal_name, "EMPRESA TESTE");
        assert_eq!(row.expense_value, Some(1500.0));
        assert_eq!(row.year, Some(2023));
        assert_eq!(row.quarter, Some(2));
        assert_eq!(row.source_file, "test.csv");
        assert!(row.issues.is_empty());
    }

    #[test]
    fn test_formatted_identifier_normalized() {
        let row = normalize_one(
            &["CNPJ", "Razão Social", "Valor", "Descrição"],
            &["12.345.678/0001-95", "  acme   saude ", "1.000,00", "Despesas com eventos"],
        )
        .unwrap();
        assert_eq!(row.identifier, "12345678000195");
        assert_eq!(row.legal_name, "ACME SAUDE");
        assert_eq!(row.expense_value, Some(1000.0));
    }

    // -------------------------------------------------------------------------
    // ISSUE TAGGING
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_fields_tagged() {
        let row = normalize_one(
            &["cnpj", "razao_social", "valor", "descricao"],
            &["", "", "abc", "DESPESA COM EVENTOS"],
        )
        .unwrap();
        assert!(row.issues.contains(&Issue::MissingIdentifier));
        assert!(row.issues.contains(&Issue::MissingLegalName));
        assert!(row.issues.contains(&Issue::InvalidExpenseValue));
        assert_eq!(row.expense_value, None);
    }

    #[test]
    fn test_non_positive_value_tagged() {
        let h = &["cnpj", "razao_social", "valor", "descricao"];
        let zero = normalize_one(h, &["12345678000195", "A", "0,00", "DESPESA COM EVENTOS"]).unwrap();
        assert_eq!(zero.issue_list(), "non_positive_expense_value");

        let negative =
            normalize_one(h, &["12345678000195", "A", "(5,00)", "DESPESA COM EVENTOS"]).unwrap();
        assert_eq!(negative.expense_value, Some(-5.0));
        assert!(negative.issues.contains(&Issue::NonPositiveExpenseValue));
    }

    #[test]
    fn test_out_of_range_value_tagged() {
        let h = &["cnpj", "razao_social", "valor", "descricao"];
        let huge = normalize_one(h, &["12345678000195", "A", "1e40", "DESPESA COM EVENTOS"]).unwrap();
        assert_eq!(huge.expense_value, Some(1e40));
        assert_eq!(huge.issue_list(), "invalid_expense_value");

        let large = normalize_one(h, &["12345678000195", "A", "1e20", "DESPESA COM EVENTOS"]).unwrap();
        assert_eq!(large.expense_value, Some(1e20));
        assert!(large.issues.is_empty());
    }

    #[test]
    fn test_short_record_padded() {
        let h = headers(&["cnpj", "razao_social", "valor", "descricao"]);
        let row = RawRow::from_record(&h, ["1", "A"]);
        assert_eq!(row.get("valor"), Some(""));
        assert_eq!(row.get("descricao"), Some(""));
    }

    #[test]
    fn test_duplicate_header_first_wins() {
        let h = headers(&["valor", "valor"]);
        let row = RawRow::from_record(&h, ["1", "2"]);
        assert_eq!(row.get("valor"), Some("1"));
    }

    // -------------------------------------------------------------------------
    // REGISTRY BACKFILL
    // -------------------------------------------------------------------------

    #[test]
    fn test_registry_backfills_before_tagging() {
        let registry = Registry::from_entries(vec![RegistryEntry {
            registry_id: "123456".to_string(),
            identifier: "12345678000195".to_string(),
            legal_name: "Operadora Exemplo".to_string(),
            region: "SP".to_string(),
            ..Default::default()
        }]);

        let h = headers(&["DATA", "REG_ANS", "DESCRICAO", "VL_SALDO_FINAL"]);
        let mapping = map_columns(&h);
        let raw = RawRow::from_record(
            &h,
            ["2023-01-01", "123456", "DESPESAS COM EVENTOS / SINISTROS", "2.500,10"],
        );
        let row = RowNormalizer::new(&mapping, Some(&registry), "1T2023.csv")
            .normalize(&raw)
            .unwrap();

        assert_eq!(row.identifier, "12345678000195");
        assert_eq!(row.legal_name, "OPERADORA EXEMPLO");
        assert_eq!(row.region, "SP");
        assert_eq!(row.expense_value, Some(2500.10));
        assert_eq!((row.year, row.quarter), (Some(2023), Some(1)));
        assert!(row.issues.is_empty());
    }
}
