//! Data-quality issue tags carried by canonical rows.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A detected anomaly. Rows accumulate these; nothing is dropped for having
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issue {
    MissingIdentifier,
    MissingLegalName,
    InvalidExpenseValue,
    NonPositiveExpenseValue,
    InvalidYear,
    InvalidQuarter,
    PeriodCorrectedFromFreetext,
    IdentifierNameCollision,
    InvalidIdentifier,
}

impl Issue {
    pub fn as_str(self) -> &'static str {
        match self {
            Issue::MissingIdentifier => "missing_identifier",
            Issue::MissingLegalName => "missing_legal_name",
            Issue::InvalidExpenseValue => "invalid_expense_value",
            Issue::NonPositiveExpenseValue => "non_positive_expense_value",
            Issue::InvalidYear => "invalid_year",
            Issue::InvalidQuarter => "invalid_quarter",
            Issue::PeriodCorrectedFromFreetext => "period_corrected_from_freetext",
            Issue::IdentifierNameCollision => "identifier_name_collision",
            Issue::InvalidIdentifier => "invalid_identifier",
        }
    }
}

// Ordered by tag text so ledger output is sorted the way it reads.
impl Ord for Issue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for Issue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
