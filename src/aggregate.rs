// 📊 Aggregation Engine
// Buckets expenses by time period and category, with optional zero-fill

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::expense::ExpenseRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// ============================================================================
// GRANULARITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Derive the bucket key for `date`
    ///
    /// `Week` uses the ISO-8601 week-numbering year, so early January dates
    /// can land in the previous year's last week (2023-01-01 is `2022-W52`).
    pub fn period_key(self, date: NaiveDate) -> PeriodKey {
        let key = match self {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = date.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => date.format("%Y-%m").to_string(),
        };
        PeriodKey(key)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

impl FromStr for Granularity {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            _ => Err(AggregateError::InvalidArgument(format!(
                "unrecognized granularity '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Bucket key such as `2024-03-01`, `2024-W09` or `2024-03`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeriodKey {
    fn from(value: &str) -> Self {
        PeriodKey(value.to_string())
    }
}

/// Totals for one period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BucketSummary {
    #[serde(rename = "category_map")]
    pub category_totals: BTreeMap<String, Decimal>,
    pub total: Decimal,
}

impl BucketSummary {
    fn add(&mut self, category: &str, amount: Decimal) {
        *self
            .category_totals
            .entry(category.to_string())
            .or_insert(Decimal::ZERO) += amount;
        self.total += amount;
    }

    /// `total` equals the sum of the category totals
    pub fn is_consistent(&self) -> bool {
        self.category_totals.values().sum::<Decimal>() == self.total
    }
}

/// Period key -> bucket summary, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AggregationResult {
    pub buckets: BTreeMap<PeriodKey, BucketSummary>,
}

impl AggregationResult {
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&BucketSummary> {
        self.buckets.get(&PeriodKey::from(key))
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PeriodKey, BucketSummary> {
        self.buckets.iter()
    }

    /// Sum of every bucket total
    pub fn grand_total(&self) -> Decimal {
        self.buckets.values().map(|b| b.total).sum()
    }

    /// Every category name that appears in at least one bucket
    pub fn categories(&self) -> BTreeSet<&str> {
        self.buckets
            .values()
            .flat_map(|b| b.category_totals.keys().map(String::as_str))
            .collect()
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug, Clone)]
pub struct Aggregator {
    granularity: Granularity,
    known_categories: Vec<String>,
}

impl Aggregator {
    pub fn new(granularity: Granularity) -> Self {
        Aggregator {
            granularity,
            known_categories: Vec::new(),
        }
    }

    /// Categories every bucket must report, with 0 when unobserved
    pub fn with_known_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn aggregate(&self, records: &[ExpenseRecord]) -> AggregationResult {
        let mut buckets: BTreeMap<PeriodKey, BucketSummary> = BTreeMap::new();

        for record in records {
            let key = self.granularity.period_key(record.date);
            buckets
                .entry(key)
                .or_default()
                .add(&record.category, record.amount);
        }

        // Zero-fill only touches buckets that records created
        for bucket in buckets.values_mut() {
            for category in &self.known_categories {
                bucket
                    .category_totals
                    .entry(category.clone())
                    .or_insert(Decimal::ZERO);
            }
        }

        AggregationResult { buckets }
    }
}

pub fn aggregate(
    records: &[ExpenseRecord],
    granularity: Granularity,
    known_categories: Option<&[String]>,
) -> AggregationResult {
    let mut aggregator = Aggregator::new(granularity);
    if let Some(categories) = known_categories {
        aggregator = aggregator.with_known_categories(categories.iter().cloned());
    }
    aggregator.aggregate(records)
}

/// Like [`aggregate`], with the granularity given as text
pub fn aggregate_by(
    records: &[ExpenseRecord],
    group_by: &str,
    known_categories: Option<&[String]>,
) -> Result<AggregationResult, AggregateError> {
    let granularity = group_by.parse::<Granularity>()?;
    Ok(aggregate(records, granularity, known_categories))
}

// ============================================================================
// TESTS
// ============================================================================
