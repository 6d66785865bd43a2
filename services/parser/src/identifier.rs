//! Identifier and free-text normalization.

/// Keep only ASCII digits. No length check; validity is the CNPJ
/// validator's job.
pub fn normalize_identifier(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Trim, collapse whitespace runs and uppercase.
pub fn normalize_legal_name(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

/// Trim, collapse whitespace runs and lowercase. Used for predicate matching.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Lowercase, fold Portuguese accents and drop everything that is not an
/// ASCII letter or digit: `"Razão_Social"` becomes `"razaosocial"`.
pub fn normalize_header(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(fold_accent)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identifier_strips_punctuation() {
        assert_eq!(normalize_identifier("12.345.678/0001-95"), "12345678000195");
    }

    #[test]
    fn test_identifier_empty() {
        assert_eq!(normalize_identifier(""), "");
        assert_eq!(normalize_identifier("n/a"), "");
    }

    #[test]
    fn test_identifier_keeps_short_values() {
        assert_eq!(normalize_identifier(" 3.1 "), "31");
    }

    #[test]
    fn test_legal_name_collapses_and_uppercases() {
        assert_eq!(normalize_legal_name("  Empresa   Teste\tLtda "), "EMPRESA TESTE LTDA");
        assert_eq!(normalize_legal_name("saúde"), "SAÚDE");
        assert_eq!(normalize_legal_name(""), "");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text(" DESPESAS  COM Eventos "), "despesas com eventos");
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Valor_Despesas"), "valordespesas");
        assert_eq!(normalize_header("VL SALDO FINAL"), "vlsaldofinal");
        assert_eq!(normalize_header("REG_ANS"), "regans");
        assert_eq!(normalize_header("Razão Social"), "razaosocial");
        assert_eq!(normalize_header("Competência"), "competencia");
    }

    proptest! {
        #[test]
        fn prop_identifier_idempotent(s in ".*") {
            let once = normalize_identifier(&s);
            prop_assert_eq!(normalize_identifier(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_digit()));
        }

        #[test]
        fn prop_legal_name_idempotent(s in "[a-zA-Z \t]{0,40}") {
            let once = normalize_legal_name(&s);
            prop_assert_eq!(normalize_legal_name(&once), once);
        }
    }
}
