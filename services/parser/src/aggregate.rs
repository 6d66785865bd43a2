//! Aggregation of clean rows by (legal name, region).
//!
//! Amounts are summed in `i128` cents so a group's total is exactly the
//! sum of its period subtotals. A value whose cents exceed `MAX_CENTS` has
//! no cent representation; normalization tags it `invalid_expense_value`
//! and the sums here skip it. `mean_period_expense` is the mean of the
//! per-period subtotals of one group; the dataset-wide row mean is a
//! different metric and lives in `ExpenseSummary::mean_row_expense`.

use crate::normalize::CanonicalRow;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub type Period = (Option<i32>, Option<u8>);

/// Largest magnitude, in cents, a single amount may carry.
pub const MAX_CENTS: i128 = 10i128.pow(30);

/// Whole cents of an amount, or `None` when it is out of range.
pub fn to_cents(value: f64) -> Option<i128> {
    let cents = (value * 100.0).round();
    if !cents.is_finite() || cents.abs() > MAX_CENTS as f64 {
        return None;
    }
    Some(cents as i128)
}

pub fn from_cents(cents: i128) -> f64 {
    cents as f64 / 100.0
}

/// One (legal name, region) group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBucket {
    pub legal_name: String,
    pub region: String,
    pub total_cents: i128,
    /// Subtotal per (year, quarter). Rows with no period share the
    /// `(None, None)` bucket.
    pub period_cents: BTreeMap<Period, i128>,
    pub mean_period_expense: f64,
    /// Sample standard deviation; absent with fewer than two periods.
    pub stddev_period_expense: Option<f64>,
}

impl AggregatedBucket {
    pub fn total_expense(&self) -> f64 {
        from_cents(self.total_cents)
    }

    pub fn period_count(&self) -> usize {
        self.period_cents.len()
    }
}

/// Group rows by (legal name, region) and compute totals and period stats.
///
/// Callers pass clean rows only. Rows without a value contribute nothing.
/// Output is sorted by total, descending; ties keep first-seen order.
pub fn aggregate<'a, I>(rows: I) -> Vec<AggregatedBucket>
where
    I: IntoIterator<Item = &'a CanonicalRow>,
{
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), (i128, BTreeMap<Period, i128>)> = HashMap::new();

    for row in rows {
        let Some(cents) = row.expense_value.and_then(to_cents) else {
            continue;
        };
        let key = (row.legal_name.clone(), row.region.clone());
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (0, BTreeMap::new())
        });
        group.0 = group.0.saturating_add(cents);
        let subtotal = group.1.entry((row.year, row.quarter)).or_insert(0);
        *subtotal = subtotal.saturating_add(cents);
    }

    let mut buckets: Vec<AggregatedBucket> = order
        .into_iter()
        .filter_map(|key| {
            let (total_cents, period_cents) = groups.remove(&key)?;
            let subtotals: Vec<f64> = period_cents.values().copied().map(from_cents).collect();
            let (mean, stddev) = mean_and_sample_stddev(&subtotals);
            Some(AggregatedBucket {
                legal_name: key.0,
                region: key.1,
                total_cents,
                period_cents,
                mean_period_expense: mean,
                stddev_period_expense: stddev,
            })
        })
        .collect();

    // sort_by is stable
    buckets.sort_by(|a, b| b.total_cents.cmp(&a.total_cents));
    buckets
}

fn mean_and_sample_stddev(values: &[f64]) -> (f64, Option<f64>) {
    if values.is_empty() {
        return (0.0, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, None);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, Some(variance.sqrt()))
}

/// Dataset-wide figures for the statistics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpenseSummary {
    pub total_expense: f64,
    /// Simple mean over rows that carry a value.
    pub mean_row_expense: f64,
    pub row_count: usize,
    pub top_legal_names: Vec<NameTotal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameTotal {
    pub legal_name: String,
    pub total_expense: f64,
}

pub fn summarize<'a, I>(rows: I, top: usize) -> ExpenseSummary
where
    I: IntoIterator<Item = &'a CanonicalRow>,
{
    let mut total_cents = 0i128;
    let mut row_count = 0usize;
    let mut order: Vec<&str> = Vec::new();
    let mut by_name: HashMap<&str, i128> = HashMap::new();

    for row in rows {
        let Some(cents) = row.expense_value.and_then(to_cents) else {
            continue;
        };
        total_cents = total_cents.saturating_add(cents);
        row_count += 1;
        let entry = by_name.entry(row.legal_name.as_str()).or_insert_with(|| {
            order.push(row.legal_name.as_str());
            0
        });
        *entry = entry.saturating_add(cents);
    }

    let mut names: Vec<(&str, i128)> = order.into_iter().map(|n| (n, by_name[n])).collect();
    names.sort_by(|a, b| b.1.cmp(&a.1));

    ExpenseSummary {
        total_expense: from_cents(total_cents),
        mean_row_expense: if row_count == 0 {
            0.0
        } else {
            from_cents(total_cents) / row_count as f64
        },
        row_count,
        top_legal_names: names
            .into_iter()
            .take(top)
            .map(|(name, cents)| NameTotal {
                legal_name: name.to_string(),
                total_expense: from_cents(cents),
            })
            .collect(),
    }
}

/// Total expense per region, keyed by region (empty when unknown).
pub fn totals_by_region<'a, I>(rows: I) -> BTreeMap<String, f64>
where
    I: IntoIterator<Item = &'a CanonicalRow>,
{
    let mut cents: BTreeMap<String, i128> = BTreeMap::new();
    for row in rows {
        if let Some(value) = row.expense_value.and_then(to_cents) {
            let total = cents.entry(row.region.clone()).or_insert(0);
            *total = total.saturating_add(value);
        }
    }
    cents.into_iter().map(|(r, c)| (r, from_cents(c))).collect()
}
