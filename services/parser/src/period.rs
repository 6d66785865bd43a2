//! Reporting period resolution.
//!
//! Statements either carry explicit year and quarter columns or a single
//! "competência" field with a date in it (`2023-05`, `2023/05/01`, ...).
//! Explicit columns win; the free text is the fallback.

use crate::issue::Issue;
use once_cell::sync::Lazy;
use regex::Regex;

static YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(20\d{2})[-/.](0[1-9]|1[0-2])").expect("valid year-month regex"));

/// Outcome of period resolution for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPeriod {
    pub year: Option<i32>,
    pub quarter: Option<u8>,
    pub issues: Vec<Issue>,
}

/// Resolve (year, quarter) from explicit fields, falling back to free text.
///
/// Present-but-invalid explicit values are tagged even when the free text
/// rescues the period. The correction tag is only set when explicit values
/// were supplied and failed; reading the period out of a competência column
/// in a file with no year/quarter columns is the normal path.
pub fn resolve_period(
    year: Option<&str>,
    quarter: Option<&str>,
    free_text: Option<&str>,
) -> ResolvedPeriod {
    let year_raw = year.map(str::trim).filter(|s| !s.is_empty());
    let quarter_raw = quarter.map(str::trim).filter(|s| !s.is_empty());

    let parsed_year = year_raw.and_then(parse_year);
    let parsed_quarter = quarter_raw.and_then(parse_quarter);

    if let (Some(year), Some(quarter)) = (parsed_year, parsed_quarter) {
        return ResolvedPeriod {
            year: Some(year),
            quarter: Some(quarter),
            issues: Vec::new(),
        };
    }

    let mut issues = Vec::new();
    if year_raw.is_some() && parsed_year.is_none() {
        issues.push(Issue::InvalidYear);
    }
    if quarter_raw.is_some() && parsed_quarter.is_none() {
        issues.push(Issue::InvalidQuarter);
    }

    if let Some((year, quarter)) = free_text.and_then(extract_year_quarter) {
        if year_raw.is_some() || quarter_raw.is_some() {
            issues.push(Issue::PeriodCorrectedFromFreetext);
        }
        return ResolvedPeriod {
            year: Some(year),
            quarter: Some(quarter),
            issues,
        };
    }

    ResolvedPeriod {
        year: None,
        quarter: None,
        issues,
    }
}

/// Find the first `YYYY-MM` style date (separator `-`, `/` or `.`) and turn
/// it into (year, quarter).
pub fn extract_year_quarter(text: &str) -> Option<(i32, u8)> {
    let caps = YEAR_MONTH.captures(text)?;
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u8 = caps.get(2)?.as_str().parse().ok()?;
    Some((year, quarter_of_month(month)))
}

fn quarter_of_month(month: u8) -> u8 {
    (month + 2) / 3
}

fn parse_year(value: &str) -> Option<i32> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_quarter(value: &str) -> Option<u8> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok().filter(|q| (1..=4).contains(q))
}
