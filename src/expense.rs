// 🧾 Expense Records
// The immutable value the store hands out and the aggregator reads

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Date format used on the wire, in CSV files and in the store
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Largest accepted single amount; keeps every sum far below `Decimal::MAX`
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

#[derive(Debug, Error, PartialEq)]
pub enum ExpenseError {
    #[error("Category must not be empty")]
    EmptyCategory,
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Decimal),
    #[error("Amount exceeds the maximum of 1000000000000: {0}")]
    AmountTooLarge(Decimal),
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

// ============================================================================
// EXPENSE RECORD
// ============================================================================

/// A single dated expense
///
/// Construct through [`ExpenseRecord::new`] so the category is non-empty and
/// the amount is non-negative and at most [`MAX_AMOUNT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub category: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExpenseRecord {
    pub fn new(
        category: impl Into<String>,
        amount: Decimal,
        date: NaiveDate,
        description: Option<String>,
    ) -> Result<Self, ExpenseError> {
        let category = category.into().trim().to_string();
        if category.is_empty() {
            return Err(ExpenseError::EmptyCategory);
        }
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ExpenseError::NegativeAmount(amount));
        }
        if amount > Decimal::from(MAX_AMOUNT) {
            return Err(ExpenseError::AmountTooLarge(amount));
        }

        // Blank descriptions are stored as absent
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(Self {
            category,
            amount,
            date,
            description,
        })
    }
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate, ExpenseError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| ExpenseError::InvalidDate(value.to_string()))
}

// ============================================================================
// NEW EXPENSE (request body)
// ============================================================================

/// Unvalidated expense as submitted by a client
#[derive(Debug, Clone, Deserialize)]
pub struct NewExpense {
    pub category: String,
    pub amount: Decimal,
    pub date: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TryFrom<NewExpense> for ExpenseRecord {
    type Error = ExpenseError;

    fn try_from(new: NewExpense) -> Result<Self, Self::Error> {
        let date = parse_date(&new.date)?;
        ExpenseRecord::new(new.category, new.amount, date, new.description)
    }
}
