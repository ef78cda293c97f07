use crate::warehouse::UpsertMode;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;

/// Local development store used when `DB_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://market_data.db";
pub const DEFAULT_TICKERS: [&str; 4] = ["CBA.AX", "NAB.AX", "WBC.AX", "ANZ.AX"];
pub const DEFAULT_WINDOW_DAYS: i64 = 100;

/// Where the warehouse lives.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseUrl {
    File(PathBuf),
    Memory,
}

impl DatabaseUrl {
    /// Parses a connection string.
    ///
    /// Accepts `sqlite://<path>`, `sqlite:<path>`, a bare path, or `:memory:`.
    ///
    /// # Errors
    /// Returns an error for empty strings and for any other URL scheme
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if path.is_empty() {
            bail!("database url {:?} has no path", url);
        }
        if path == ":memory:" {
            return Ok(Self::Memory);
        }
        if path.contains("://") {
            bail!("unsupported database url scheme: {}", url);
        }

        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Run configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: DatabaseUrl,
    pub tickers: Vec<String>,
    pub window_days: i64,
    pub upsert_mode: UpsertMode,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// `DB_URL` falls back to `DEFAULT_DATABASE_URL`; `ETL_TICKERS`,
    /// `ETL_WINDOW_DAYS` and `ETL_UPSERT_MODE` are optional overrides.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("DB_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let database_url = DatabaseUrl::parse(&url)?;

        let tickers = match lookup("ETL_TICKERS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_TICKERS.iter().map(|s| s.to_string()).collect(),
        };

        let window_days = match lookup("ETL_WINDOW_DAYS") {
            Some(days) => {
                let days: i64 = days
                    .trim()
                    .parse()
                    .with_context(|| format!("ETL_WINDOW_DAYS is not a number: {}", days))?;
                if days <= 0 {
                    bail!("ETL_WINDOW_DAYS must be positive, got {}", days);
                }
                days
            }
            None => DEFAULT_WINDOW_DAYS,
        };

        let upsert_mode = match lookup("ETL_UPSERT_MODE") {
            Some(mode) => mode.parse()?,
            None => UpsertMode::default(),
        };

        Ok(Self {
            database_url,
            tickers,
            window_days,
            upsert_mode,
        })
    }
}
