use super::{Warehouse, CREATE_PRICES_TABLE, PRICES_TABLE};
use crate::data::PriceObservation;
use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use rusqlite::{params, Transaction};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

const CREATE_STAGING_TABLE: &str = r#"
    DROP TABLE IF EXISTS temp.temp_staging;
    CREATE TEMP TABLE temp_staging (
        date            TIMESTAMP,
        ticker          TEXT,
        close_price     DECIMAL,
        moving_avg_7d   DECIMAL,
        daily_return    DECIMAL,
        volatility_7d   DECIMAL,
        extracted_at    TIMESTAMP
    );
"#;

const INSERT_STAGING: &str = r#"
    INSERT INTO temp.temp_staging
        (date, ticker, close_price, moving_avg_7d, daily_return, volatility_7d, extracted_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

// `WHERE true` keeps SQLite from reading ON CONFLICT as a join constraint.
const MERGE_STAGING: &str = r#"
    INSERT INTO stock_prices
        (date, ticker, close_price, moving_avg_7d, daily_return, volatility_7d, extracted_at)
    SELECT date, ticker, close_price, moving_avg_7d, daily_return, volatility_7d, extracted_at
    FROM temp.temp_staging
    WHERE true
    ON CONFLICT (date, ticker) DO UPDATE SET
        close_price = excluded.close_price,
        moving_avg_7d = excluded.moving_avg_7d,
        daily_return = excluded.daily_return,
        volatility_7d = excluded.volatility_7d,
        extracted_at = excluded.extracted_at
"#;

const DROP_STAGING: &str = "DROP TABLE temp.temp_staging;";

const UPSERT_ROW: &str = r#"
    INSERT INTO stock_prices
        (date, ticker, close_price, moving_avg_7d, daily_return, volatility_7d, extracted_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (date, ticker) DO UPDATE SET
        close_price = excluded.close_price,
        moving_avg_7d = excluded.moving_avg_7d,
        daily_return = excluded.daily_return,
        volatility_7d = excluded.volatility_7d,
        extracted_at = excluded.extracted_at
"#;

/// How a batch is merged into `stock_prices`.
///
/// Both modes run inside a single transaction and leave the table in the
/// same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertMode {
    /// Bulk-write into a temporary staging table, then merge it with one
    /// conflict-resolving `INSERT ... SELECT`.
    #[default]
    Staged,
    /// Upsert each row straight into the permanent table.
    Direct,
}

impl FromStr for UpsertMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" | "staging" => Ok(Self::Staged),
            "direct" => Ok(Self::Direct),
            other => bail!("unknown upsert mode: {}", other),
        }
    }
}

impl fmt::Display for UpsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staged => write!(f, "staged"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub mode: UpsertMode,
}

impl Warehouse {
    /// Upserts `rows` into `stock_prices`, keyed on `(date, ticker)`.
    ///
    /// Creates the table if needed, then inserts absent keys and overwrites
    /// every non-key column of present keys. Keys not in `rows` are left
    /// alone. The whole batch is one transaction: on any error nothing is
    /// applied and the error is returned.
    ///
    /// # Arguments
    /// * `rows`: The batch to persist, may be empty
    /// * `mode`: Whether to merge through a staging table
    pub fn load(&mut self, rows: &[PriceObservation], mode: UpsertMode) -> Result<LoadReport> {
        let tx = self
            .conn
            .transaction()
            .context("failed to begin load transaction")?;

        tx.execute_batch(CREATE_PRICES_TABLE)
            .with_context(|| format!("failed to create {}", PRICES_TABLE))?;

        match mode {
            UpsertMode::Staged => stage_and_merge(&tx, rows)?,
            UpsertMode::Direct => upsert_rows(&tx, rows)?,
        }

        tx.commit().context("failed to commit load transaction")?;
        info!(rows = rows.len(), %mode, "loaded batch into {}", PRICES_TABLE);

        Ok(LoadReport {
            rows: rows.len(),
            mode,
        })
    }
}

fn stage_and_merge(tx: &Transaction<'_>, rows: &[PriceObservation]) -> Result<()> {
    tx.execute_batch(CREATE_STAGING_TABLE)
        .context("failed to create staging table")?;

    {
        let mut stmt = tx.prepare(INSERT_STAGING)?;
        for row in rows {
            execute_row(&mut stmt, row).context("failed to write staging row")?;
        }
    }
    debug!(rows = rows.len(), "staged batch");

    let merged = tx
        .execute(MERGE_STAGING, [])
        .context("failed to merge staging table")?;
    debug!(merged, "merged staging table");

    tx.execute_batch(DROP_STAGING)
        .context("failed to drop staging table")?;

    Ok(())
}

fn upsert_rows(tx: &Transaction<'_>, rows: &[PriceObservation]) -> Result<()> {
    let mut stmt = tx.prepare(UPSERT_ROW)?;
    for row in rows {
        execute_row(&mut stmt, row)
            .with_context(|| format!("failed to upsert {} {}", row.ticker, row.date))?;
    }

    Ok(())
}

fn execute_row(
    stmt: &mut rusqlite::Statement<'_>,
    row: &PriceObservation,
) -> rusqlite::Result<usize> {
    stmt.execute(params![
        row.date.and_time(NaiveTime::MIN),
        row.ticker,
        row.close_price,
        row.moving_avg_7d,
        row.daily_return,
        row.volatility_7d,
        row.extracted_at,
    ])
}
