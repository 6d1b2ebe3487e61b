use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "EXPENSE_TRACKER_CONFIG";
pub const DB_ENV: &str = "EXPENSE_TRACKER_DB";
pub const ADDR_ENV: &str = "EXPENSE_TRACKER_ADDR";
const DEFAULT_CONFIG_FILE: &str = "expense-tracker.json";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    /// Origin allowed by CORS (the web frontend)
    pub allowed_origin: String,
    pub token_ttl_minutes: i64,
    /// Categories reported in every bucket of an unfiltered report
    pub categories: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("expenses.db"),
            bind_addr: "127.0.0.1:5000".to_string(),
            allowed_origin: "http://localhost:5173".to_string(),
            token_ttl_minutes: 30,
            categories: ["Food", "Travel", "Entertainment", "Health", "Other"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Explicit path, then `$EXPENSE_TRACKER_CONFIG`, then `./expense-tracker.json`,
    /// then built-in defaults; env overrides are applied last
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                local.exists().then_some(local)
            });

        let mut config = match path {
            Some(path) => Self::load_from_path(&path)?,
            None => {
                debug!("No config file, using defaults");
                Config::default()
            }
        };

        config.apply_overrides(env::var(DB_ENV).ok(), env::var(ADDR_ENV).ok());
        Ok(config)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!(path = %path.as_ref().display(), "Loaded config");
        Ok(config)
    }

    fn apply_overrides(&mut self, database_path: Option<String>, bind_addr: Option<String>) {
        if let Some(db) = database_path.filter(|s| !s.is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(addr) = bind_addr.filter(|s| !s.is_empty()) {
            self.bind_addr = addr;
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_ttl_minutes)
    }
}
