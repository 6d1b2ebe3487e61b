use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::expense::{parse_date, ExpenseRecord};

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Expenses (amount kept as decimal text so it round-trips exactly)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            amount TEXT NOT NULL,
            date TEXT NOT NULL,
            description TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Users and sessions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_category ON expenses(category)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// EXPENSES
// ============================================================================

pub fn insert_expense(conn: &Connection, expense: &ExpenseRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO expenses (category, amount, date, description) VALUES (?1, ?2, ?3, ?4)",
        params![
            expense.category,
            expense.amount.to_string(),
            expense.date,
            expense.description,
        ],
    )?;

    let id = conn.last_insert_rowid();
    debug!(id, category = %expense.category, amount = %expense.amount, "expense inserted");
    Ok(id)
}

/// Insert a batch in one transaction; nothing is written if any row fails
pub fn insert_expenses(conn: &mut Connection, expenses: &[ExpenseRecord]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO expenses (category, amount, date, description) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for expense in expenses {
            stmt.execute(params![
                expense.category,
                expense.amount.to_string(),
                expense.date,
                expense.description,
            ])?;
        }
    }
    tx.commit()?;

    info!(inserted = expenses.len(), "expenses imported");
    Ok(expenses.len())
}

/// Expenses dated within `start..=end`, optionally for one category
pub fn fetch_expenses(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
    category: Option<&str>,
) -> Result<Vec<ExpenseRecord>> {
    let mut stmt = conn.prepare(
        "SELECT category, amount, date, description
         FROM expenses
         WHERE date BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR category = ?3)
         ORDER BY date, id",
    )?;

    let expenses = stmt
        .query_map(params![start, end, category], |row| {
            let amount_text: String = row.get(1)?;
            let amount = Decimal::from_str(&amount_text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

            let category: String = row.get(0)?;
            ExpenseRecord::new(category, amount, row.get(2)?, row.get(3)?)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(%start, %end, ?category, count = expenses.len(), "expenses fetched");
    Ok(expenses)
}

pub fn count_expenses(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Deserialize)]
struct CsvExpense {
    category: String,
    amount: String,
    date: String,
    #[serde(default)]
    description: Option<String>,
}

/// Load expenses from a CSV file with a `category,amount,date,description` header
pub fn load_csv(csv_path: &Path) -> Result<Vec<ExpenseRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {}", csv_path.display()))?;

    let mut expenses = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row: CsvExpense =
            result.with_context(|| format!("Failed to read CSV line {}", line))?;

        let amount = Decimal::from_str(row.amount.trim())
            .with_context(|| format!("Invalid amount '{}' on line {}", row.amount, line))?;
        let date = parse_date(&row.date).with_context(|| format!("Line {}", line))?;
        let expense = ExpenseRecord::new(row.category, amount, date, row.description)
            .with_context(|| format!("Line {}", line))?;

        expenses.push(expense);
    }

    Ok(expenses)
}

// ============================================================================
// USERS & SESSIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Returns `false` when the username is already taken
pub fn create_user(conn: &Connection, username: &str, password_hash: &str) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
        params![username, password_hash],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_user(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, password_hash FROM users WHERE username = ?1",
            [username],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password_hash: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(user)
}

pub fn insert_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (token, username, expires_at) VALUES (?1, ?2, ?3)",
        params![session.token, session.username, session.expires_at.timestamp()],
    )?;

    Ok(())
}

pub fn find_session(conn: &Connection, token: &str) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            "SELECT token, username, expires_at FROM sessions WHERE token = ?1",
            [token],
            |row| {
                let expires_at: i64 = row.get(2)?;
                Ok(Session {
                    token: row.get(0)?,
                    username: row.get(1)?,
                    expires_at: DateTime::from_timestamp(expires_at, 0).ok_or(
                        rusqlite::Error::IntegralValueOutOfRange(2, expires_at),
                    )?,
                })
            },
        )
        .optional()?;

    Ok(session)
}

pub fn delete_expired_sessions(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        [now.timestamp()],
    )?;
    if removed > 0 {
        debug!(removed, "expired sessions removed");
    }
    Ok(removed)
}
