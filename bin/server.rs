// Expense Tracker - Web Server

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use expense_tracker::config::Config;
use expense_tracker::db::open_database;
use expense_tracker::log::init_logging;
use expense_tracker::server::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "expense-server", version, about = "Expense tracker HTTP API")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load(args.config.as_deref())?;
    let conn = open_database(&config.database_path)?;
    let addr = config.bind_addr.clone();

    let app = router(AppState::new(conn, config))?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until the process is killed
        std::future::pending::<()>().await;
    }
}
