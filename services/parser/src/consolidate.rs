//! Cross-file consolidation.
//!
//! Responsibilities:
//! - Accumulate canonical rows from every processed file
//! - Detect identifiers seen with more than one legal name
//! - Validate identifier check digits
//! - Build the issue ledger (per-tag counts plus flagged rows)
//!
//! Rows are never dropped here. The ledger is a second view over the same
//! rows, not a filter on the main output.

use crate::cnpj::is_valid_cnpj;
use crate::issue::Issue;
use crate::normalize::CanonicalRow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Collects rows across files. Collision detection needs the whole dataset,
/// so tagging waits for `finish`.
#[derive(Debug, Default)]
pub struct Consolidator {
    rows: Vec<CanonicalRow>,
    names_by_identifier: HashMap<String, BTreeSet<String>>,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: CanonicalRow) {
        if !row.identifier.is_empty() && !row.legal_name.is_empty() {
            self.names_by_identifier
                .entry(row.identifier.clone())
                .or_default()
                .insert(row.legal_name.clone());
        }
        self.rows.push(row);
    }

    pub fn extend<I: IntoIterator<Item = CanonicalRow>>(&mut self, rows: I) {
        for row in rows {
            self.push(row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Identifiers carrying two or more distinct legal names.
    pub fn collisions(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.names_by_identifier
            .iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(id, names)| (id.clone(), names.clone()))
            .collect()
    }

    /// Tag collisions and invalid identifiers, then assemble the ledger.
    pub fn finish(self) -> Consolidated {
        let collisions = self.collisions();
        let mut rows = self.rows;

        let mut collision_rows = 0;
        let mut invalid_rows = 0;
        for row in &mut rows {
            if collisions.contains_key(&row.identifier) {
                row.tag(Issue::IdentifierNameCollision);
                collision_rows += 1;
            }
            // Empty identifiers already carry missing_identifier
            if !row.identifier.is_empty() && !is_valid_cnpj(&row.identifier) {
                row.tag(Issue::InvalidIdentifier);
                invalid_rows += 1;
            }
        }

        for (identifier, names) in &collisions {
            debug!(%identifier, names = ?names, "identifier seen with multiple legal names");
        }
        info!(
            rows = rows.len(),
            colliding_identifiers = collisions.len(),
            collision_rows,
            invalid_identifier_rows = invalid_rows,
            "consolidation finished"
        );

        let ledger = IssueLedger::from_rows(&rows);
        Consolidated {
            rows,
            ledger,
            collisions,
        }
    }
}

/// Result of consolidation.
#[derive(Debug, Clone, Default)]
pub struct Consolidated {
    /// Every row, issues and all.
    pub rows: Vec<CanonicalRow>,
    pub ledger: IssueLedger,
    pub collisions: BTreeMap<String, BTreeSet<String>>,
}

impl Consolidated {
    /// Rows eligible for aggregation.
    pub fn clean_rows(&self) -> impl Iterator<Item = &CanonicalRow> {
        self.rows.iter().filter(|r| !r.has_issues())
    }
}

/// Per-tag counts and the rows that carry at least one tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueLedger {
    pub counts: BTreeMap<Issue, usize>,
    pub entries: Vec<CanonicalRow>,
}

impl IssueLedger {
    /// A row with N tags contributes to N counters.
    pub fn from_rows(rows: &[CanonicalRow]) -> Self {
        let mut ledger = IssueLedger::default();
        for row in rows.iter().filter(|r| r.has_issues()) {
            for issue in &row.issues {
                *ledger.counts.entry(*issue).or_insert(0) += 1;
            }
            ledger.entries.push(row.clone());
        }
        ledger
    }

    /// Tag text to count, sorted by tag.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        self.counts.iter().map(|(i, n)| (i.as_str(), *n)).collect()
    }

    pub fn count(&self, issue: Issue) -> usize {
        self.counts.get(&issue).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
