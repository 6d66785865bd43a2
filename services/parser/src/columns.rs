//! Heuristic column mapping.
//!
//! Source files from different quarters name the same column differently
//! (`CNPJ`, `Nr_CNPJ`, `REG_ANS`, `VL_SALDO_FINAL`, `Valor_Despesas`, ...).
//! Each semantic field owns a ranked list of keyword rules; a header scores
//! the highest weight among the rules with a keyword contained in its
//! normalized form, and the field takes the strictly best-scoring header.
//!
//! Ties go to the first column in file order. Output files are compared
//! across runs, so this ordering must not change.

use crate::identifier::normalize_header;
use serde::Serialize;
use std::collections::BTreeMap;

/// The canonical meaning a source column can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticField {
    Identifier,
    RegistryId,
    LegalName,
    ExpenseValue,
    Description,
    Period,
    Year,
    Quarter,
}

impl SemanticField {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticField::Identifier => "identifier",
            SemanticField::RegistryId => "registry_id",
            SemanticField::LegalName => "legal_name",
            SemanticField::ExpenseValue => "expense_value",
            SemanticField::Description => "description",
            SemanticField::Period => "period",
            SemanticField::Year => "year",
            SemanticField::Quarter => "quarter",
        }
    }
}

/// One ranked rule: any keyword contained in the normalized header scores
/// `weight`. An `exact` rule only scores a header equal to a keyword.
#[derive(Debug)]
pub struct ColumnRule {
    pub keywords: &'static [&'static str],
    pub weight: u8,
    pub exact: bool,
}

const fn rule(keywords: &'static [&'static str], weight: u8) -> ColumnRule {
    ColumnRule {
        keywords,
        weight,
        exact: false,
    }
}

const fn exact(keywords: &'static [&'static str], weight: u8) -> ColumnRule {
    ColumnRule {
        keywords,
        weight,
        exact: true,
    }
}

impl ColumnRule {
    fn matches(&self, normalized: &str) -> bool {
        if self.exact {
            self.keywords.iter().any(|k| normalized == *k)
        } else {
            self.keywords.iter().any(|k| normalized.contains(k))
        }
    }
}

/// Rule table, evaluated in this order. Keywords are matched against
/// `normalize_header` output, so they are lowercase and accent-free.
pub const RULES: &[(SemanticField, &[ColumnRule])] = &[
    (SemanticField::Identifier, &[rule(&["cnpj"], 3)]),
    (
        SemanticField::RegistryId,
        &[
            rule(&["regans", "registroans", "registro", "ans"], 2),
            rule(&["reg"], 1),
        ],
    ),
    (
        SemanticField::LegalName,
        &[
            rule(&["razaosocial"], 3),
            rule(&["razao", "nomerazao"], 2),
            rule(&["operadora", "nome"], 1),
        ],
    ),
    (
        SemanticField::ExpenseValue,
        &[
            rule(&["saldofinal", "valorfinal"], 3),
            rule(&["saldo"], 2),
            rule(&["valor", "vlr", "valores"], 1),
        ],
    ),
    (
        SemanticField::Description,
        &[
            rule(&["descricao", "desc"], 3),
            rule(&["nomeconta"], 2),
            rule(&["conta", "item"], 1),
        ],
    ),
    (
        SemanticField::Period,
        &[
            rule(&["compet", "periodo", "referencia"], 3),
            rule(&["data", "dt"], 2),
        ],
    ),
    // Bare "ano" is a substring of plano, cano, ...
    (
        SemanticField::Year,
        &[rule(&["anobase", "exercicio", "year"], 2), exact(&["ano"], 1)],
    ),
    (SemanticField::Quarter, &[rule(&["trimestre", "quarter"], 2)]),
];

/// Chosen source column per semantic field. Built once per file header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    columns: BTreeMap<SemanticField, String>,
}

impl ColumnMapping {
    pub fn get(&self, field: SemanticField) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn is_mapped(&self, field: SemanticField) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SemanticField, &str)> {
        self.columns.iter().map(|(f, c)| (*f, c.as_str()))
    }
}

/// Assign each semantic field its best-scoring header. Pure and total: a
/// field with no header scoring above zero is simply left unmapped.
pub fn map_columns(headers: &[String]) -> ColumnMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut columns = BTreeMap::new();

    for (field, rules) in RULES {
        let mut best: Option<usize> = None;
        let mut best_score = 0u8;

        for (idx, norm) in normalized.iter().enumerate() {
            let score = score_header(norm, rules);
            // strictly greater keeps the first column on ties
            if score > best_score {
                best_score = score;
                best = Some(idx);
            }
        }

        if let Some(idx) = best {
            columns.insert(*field, headers[idx].clone());
        }
    }

    ColumnMapping { columns }
}

fn score_header(normalized: &str, rules: &[ColumnRule]) -> u8 {
    rules
        .iter()
        .filter(|r| r.matches(normalized))
        .map(|r| r.weight)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // -------------------------------------------------------------------------
    // DETERMINISM
    // -------------------------------------------------------------------------

    #[test]
    fn test_consolidated_header_mapping() {
        let h = headers(&["CNPJ", "Razao_Social", "Valor_Despesas", "Competencia"]);
        let mapping = map_columns(&h);

        assert_eq!(mapping.get(SemanticField::Identifier), Some("CNPJ"));
        assert_eq!(mapping.get(SemanticField::LegalName), Some("Razao_Social"));
        assert_eq!(mapping.get(SemanticField::ExpenseValue), Some("Valor_Despesas"));
        assert_eq!(mapping.get(SemanticField::Period), Some("Competencia"));
        assert_eq!(mapping.get(SemanticField::RegistryId), None);
        assert_eq!(mapping.get(SemanticField::Year), None);
    }

    #[test]
    fn test_mapping_repeatable() {
        let h = headers(&["CNPJ", "Razao_Social", "Valor_Despesas", "Competencia"]);
        let baseline = map_columns(&h);
        for _ in 0..10 {
            assert_eq!(map_columns(&h), baseline);
        }
    }

    // -------------------------------------------------------------------------
    // SCORING
    // -------------------------------------------------------------------------

    #[test]
    fn test_regulator_statement_header() {
        let h = headers(&[
            "DATA",
            "REG_ANS",
            "CD_CONTA_CONTABIL",
            "DESCRICAO",
            "VL_SALDO_INICIAL",
            "VL_SALDO_FINAL",
        ]);
        let mapping = map_columns(&h);

        assert_eq!(mapping.get(SemanticField::Period), Some("DATA"));
        assert_eq!(mapping.get(SemanticField::RegistryId), Some("REG_ANS"));
        assert_eq!(mapping.get(SemanticField::Description), Some("DESCRICAO"));
        // saldofinal (3) beats saldo (2)
        assert_eq!(mapping.get(SemanticField::ExpenseValue), Some("VL_SALDO_FINAL"));
        assert_eq!(mapping.get(SemanticField::Identifier), None);
    }

    #[test]
    fn test_higher_weight_wins_regardless_of_position() {
        let h = headers(&["Nome", "Razao", "Razão Social"]);
        let mapping = map_columns(&h);
        assert_eq!(mapping.get(SemanticField::LegalName), Some("Razão Social"));
    }

    #[test]
    fn test_tie_goes_to_first_column() {
        let h = headers(&["valor_a", "valor_b"]);
        assert_eq!(map_columns(&h).get(SemanticField::ExpenseValue), Some("valor_a"));

        let h = headers(&["valor_b", "valor_a"]);
        assert_eq!(map_columns(&h).get(SemanticField::ExpenseValue), Some("valor_b"));
    }

    #[test]
    fn test_explicit_year_and_quarter_columns() {
        let h = headers(&["cnpj", "ano", "trimestre", "valor"]);
        let mapping = map_columns(&h);
        assert_eq!(mapping.get(SemanticField::Year), Some("ano"));
        assert_eq!(mapping.get(SemanticField::Quarter), Some("trimestre"));
    }

    #[test]
    fn test_bare_ano_matches_whole_header_only() {
        let h = headers(&["Cod_Plano", "Nome_Plano", "CNPJ", "Valor", "Competencia"]);
        let mapping = map_columns(&h);
        assert!(!mapping.is_mapped(SemanticField::Year));
        assert_eq!(mapping.get(SemanticField::Period), Some("Competencia"));

        let h = headers(&["Cod_Plano", "Ano", "Ano_Base"]);
        assert_eq!(map_columns(&h).get(SemanticField::Year), Some("Ano_Base"));

        let h = headers(&["Cod_Plano", "ANO"]);
        assert_eq!(map_columns(&h).get(SemanticField::Year), Some("ANO"));
    }

    // -------------------------------------------------------------------------
    // EDGE CASES
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_header_list() {
        let mapping = map_columns(&[]);
        assert_eq!(mapping.iter().count(), 0);
    }

    #[test]
    fn test_unrelated_headers_map_nothing() {
        let h = headers(&["foo", "bar", ""]);
        let mapping = map_columns(&h);
        assert!(!mapping.is_mapped(SemanticField::Identifier));
        assert!(!mapping.is_mapped(SemanticField::ExpenseValue));
    }

    #[test]
    fn test_mapping_serializes_by_field_name() {
        let h = headers(&["CNPJ", "Valor"]);
        let json = serde_json::to_value(map_columns(&h)).unwrap();
        assert_eq!(json["identifier"], "CNPJ");
        assert_eq!(json["expense_value"], "Valor");
    }
}
