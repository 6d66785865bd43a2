//! Locale-ambiguous number parsing.
//!
//! Source statements mix `1.234,56` (Brazilian) and `1,234.56` notations,
//! sometimes in the same directory. Parsing never fails loudly: an
//! unparsable value comes back as `None` and the caller tags the row.

/// Parse a monetary string into a signed float.
///
/// Rules, in order:
/// 1. trim; empty is `None`
/// 2. `(123.45)` is negative
/// 3. both `,` and `.` present: the later one is the decimal point
/// 4. only `,` present: it is the decimal point (any `.` is grouping)
/// 5. otherwise `,` is grouping and dropped
pub fn parse_number(value: &str) -> Option<f64> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    // Currency marker and digit-group spaces show up in some exports
    let mut text: String = text
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut negative = false;
    if text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }

    let cleaned = match (text.rfind(','), text.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => text.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => text.replace(',', ""),
        (Some(_), None) => text.replace(',', "."),
        _ => text.replace(',', ""),
    };

    let parsed: f64 = cleaned.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

/// Format an optional amount with exactly two decimals; absent is empty.
pub fn format_amount(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => String::new(),
    }
}
