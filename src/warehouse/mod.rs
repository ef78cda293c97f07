//! Relational store for `stock_prices`.
//!
//! A `Warehouse` owns one SQLite connection for the whole run. It is built
//! explicitly in `main` and handed to the loader and to the read queries.

mod loader;
mod queries;

pub use loader::{LoadReport, UpsertMode};

use crate::config::DatabaseUrl;
use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

pub const PRICES_TABLE: &str = "stock_prices";

const CREATE_PRICES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS stock_prices (
        date            TIMESTAMP,
        ticker          TEXT,
        close_price     DECIMAL,
        moving_avg_7d   DECIMAL,
        daily_return    DECIMAL,
        volatility_7d   DECIMAL,
        extracted_at    TIMESTAMP,
        PRIMARY KEY (date, ticker)
    );
"#;

/// Handle to the price warehouse.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Opens the store named by `url`, creating the database file (and its
    /// parent directory) when missing.
    pub fn open(url: &DatabaseUrl) -> Result<Self> {
        match url {
            DatabaseUrl::Memory => Self::open_in_memory(),
            DatabaseUrl::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }

                let conn = Connection::open(path)
                    .with_context(|| format!("failed to open database {}", path.display()))?;
                debug!(path = %path.display(), "opened warehouse");
                Ok(Self { conn })
            }
        }
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Ok(Self { conn })
    }

    /// Creates `stock_prices` if it does not exist. Existing rows are untouched.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_PRICES_TABLE)
            .with_context(|| format!("failed to create {}", PRICES_TABLE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_schema_is_repeatable() {
        let warehouse = Warehouse::open_in_memory().unwrap();
        warehouse.ensure_schema().unwrap();
        warehouse
            .conn
            .execute(
                "INSERT INTO stock_prices VALUES
                 ('2024-01-08 00:00:00', 'CBA.AX', 1, 1, 0, 0, '2024-01-09 00:00:00')",
                [],
            )
            .unwrap();

        warehouse.ensure_schema().unwrap();
        assert_eq!(warehouse.row_count().unwrap(), 1);
    }

    #[test]
    fn test_open_file_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("nested").join("market_data.db");

        let warehouse = Warehouse::open(&DatabaseUrl::File(path.clone())).unwrap();
        warehouse.ensure_schema().unwrap();
        drop(warehouse);

        assert!(path.exists());
        let reopened = Warehouse::open(&DatabaseUrl::File(path)).unwrap();
        assert_eq!(reopened.row_count().unwrap(), 0);
    }
}
