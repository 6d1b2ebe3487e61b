use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::info;

use expense_tracker::aggregate::{AggregationResult, Aggregator, Granularity};
use expense_tracker::config::Config;
use expense_tracker::expense::{parse_date, ExpenseRecord};
use expense_tracker::log::init_logging;
use expense_tracker::period::Period;
use expense_tracker::{auth, db};

#[derive(Debug, Parser)]
#[command(name = "expense-tracker", version, about = "Track and summarize dated expenses")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Import expenses from a CSV file (category,amount,date,description)
    Import { csv: PathBuf },
    /// Record a single expense
    Add {
        #[arg(long)]
        category: String,
        #[arg(long)]
        amount: Decimal,
        /// Date as YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Summarize expenses by period and category
    Report {
        /// daily, weekly or monthly, ending today
        #[arg(long, default_value = "daily", conflicts_with_all = ["group_by", "from", "to"])]
        period: String,
        /// day, week or month over an explicit --from/--to range
        #[arg(long, requires_all = ["from", "to"])]
        group_by: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Print JSON in the API's shape instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Interactive dashboard
    #[cfg(feature = "tui")]
    Ui {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    /// Register a user for the HTTP API
    Add {
        username: String,
        #[arg(long)]
        password: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Init => {
            db::open_database(&config.database_path)?;
            println!("✓ Database initialized: {}", config.database_path.display());
        }
        Command::Import { csv } => run_import(&config, &csv)?,
        Command::Add {
            category,
            amount,
            date,
            description,
        } => {
            let date = match date {
                Some(date) => parse_date(&date)?,
                None => Local::now().date_naive(),
            };
            let expense = ExpenseRecord::new(category, amount, date, description)?;
            let conn = db::open_database(&config.database_path)?;
            db::insert_expense(&conn, &expense)?;
            println!("✓ Added {} {} on {}", expense.category, expense.amount, expense.date);
        }
        Command::Report {
            period,
            group_by,
            from,
            to,
            category,
            json,
        } => {
            let (start, end, granularity) = match group_by {
                Some(group_by) => {
                    let granularity = group_by.parse::<Granularity>()?;
                    let start = parse_date(from.as_deref().unwrap_or_default())?;
                    let end = parse_date(to.as_deref().unwrap_or_default())?;
                    (start, end, granularity)
                }
                None => {
                    let (range, granularity) =
                        period.parse::<Period>()?.resolve(Local::now().date_naive());
                    (range.start, range.end, granularity)
                }
            };
            if start > end {
                bail!("--from {} is after --to {}", start, end);
            }

            let conn = db::open_database(&config.database_path)?;
            let category = category.as_deref().map(str::trim).filter(|c| !c.is_empty());
            let records = db::fetch_expenses(&conn, start, end, category)?;

            let mut aggregator = Aggregator::new(granularity);
            if category.is_none() {
                aggregator = aggregator.with_known_categories(config.categories.iter().cloned());
            }
            let result = aggregator.aggregate(&records);

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_report(&result, start, end, granularity);
            }
        }
        Command::User {
            command: UserCommand::Add { username, password },
        } => {
            let conn = db::open_database(&config.database_path)?;
            auth::register(&conn, &username, &password)?;
            println!("✓ User {} registered", username.trim());
        }
        #[cfg(feature = "tui")]
        Command::Ui { from, to } => run_ui(&config, from, to)?,
    }

    Ok(())
}

fn run_import(config: &Config, csv_path: &Path) -> Result<()> {
    println!("📂 Loading CSV...");
    let expenses = db::load_csv(csv_path)?;
    println!("✓ Loaded {} expenses from CSV", expenses.len());

    let mut conn = db::open_database(&config.database_path)?;
    let inserted = db::insert_expenses(&mut conn, &expenses)?;
    let count = db::count_expenses(&conn)?;

    info!(inserted, count, "import finished");
    println!("✓ Inserted {} expenses ({} in database)", inserted, count);
    Ok(())
}

fn print_report(result: &AggregationResult, start: NaiveDate, end: NaiveDate, granularity: Granularity) {
    println!("Expenses {} .. {} by {}", start, end, granularity);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if result.is_empty() {
        println!("No expenses in range");
        return;
    }

    for (key, bucket) in result.iter() {
        println!("{:<12} {:>12.2}", key.as_str(), bucket.total);
        for (category, amount) in &bucket.category_totals {
            println!("  {:<18} {:>12.2}", category, amount);
        }
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{:<12} {:>12.2}", "Total", result.grand_total());
}

#[cfg(feature = "tui")]
fn run_ui(config: &Config, from: Option<String>, to: Option<String>) -> Result<()> {
    use expense_tracker::ui;

    let today = Local::now().date_naive();
    let start = match from {
        Some(from) => parse_date(&from)?,
        None => NaiveDate::from_ymd_opt(chrono::Datelike::year(&today), 1, 1)
            .ok_or_else(|| anyhow::anyhow!("Invalid start of year"))?,
    };
    let end = match to {
        Some(to) => parse_date(&to)?,
        None => today,
    };

    let conn = db::open_database(&config.database_path)?;
    let expenses = db::fetch_expenses(&conn, start, end, None)?;
    println!("✓ Loaded {} expenses", expenses.len());

    let mut app = ui::App::new(expenses, config.categories.clone());
    ui::run_ui(&mut app)?;

    Ok(())
}
