// Expense Tracker - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod db;
pub mod expense;
pub mod log;
pub mod period;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use aggregate::{
    aggregate, aggregate_by, AggregateError, AggregationResult, Aggregator, BucketSummary,
    Granularity, PeriodKey,
};
pub use expense::{ExpenseError, ExpenseRecord, NewExpense, MAX_AMOUNT};
pub use period::{DateRange, Period};
pub use config::Config;
pub use db::{
    count_expenses, fetch_expenses, insert_expense, insert_expenses, load_csv, open_database,
    setup_database,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
