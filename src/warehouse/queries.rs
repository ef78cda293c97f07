use super::Warehouse;
use crate::data::PriceObservation;
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

const SELECT_HISTORY: &str = r#"
    SELECT date, ticker, close_price, moving_avg_7d, daily_return, volatility_7d, extracted_at
    FROM stock_prices
    WHERE ticker = ?1
    ORDER BY date DESC
    LIMIT ?2
"#;

/// Headline figures for one ticker, taken from its two most recent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSnapshot {
    pub ticker: String,
    pub latest_price: f64,
    pub previous_price: f64,
    /// Percent change from the previous close to the latest close.
    pub delta_pct: f64,
    pub volatility_7d: f64,
    pub last_updated: NaiveDate,
}

impl Warehouse {
    /// Every ticker with at least one stored row, ascending.
    pub fn distinct_tickers(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT ticker FROM stock_prices ORDER BY ticker")?;

        let tickers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to read tickers")?;

        Ok(tickers)
    }

    /// Full stored history of `ticker`, most recent date first.
    pub fn ticker_history(&self, ticker: &str) -> Result<Vec<PriceObservation>> {
        self.query_history(ticker, -1)
    }

    /// Latest price, change against the previous close and latest volatility.
    ///
    /// # Errors
    /// Returns an error if fewer than two rows are stored for `ticker`
    pub fn latest_snapshot(&self, ticker: &str) -> Result<TickerSnapshot> {
        let recent = self.query_history(ticker, 2)?;
        let [latest, previous] = recent.as_slice() else {
            bail!(
                "{} has {} stored rows, at least 2 are needed for a snapshot",
                ticker,
                recent.len()
            );
        };

        Ok(TickerSnapshot {
            ticker: latest.ticker.clone(),
            latest_price: latest.close_price,
            previous_price: previous.close_price,
            delta_pct: (latest.close_price - previous.close_price) / previous.close_price * 100.0,
            volatility_7d: latest.volatility_7d,
            last_updated: latest.date,
        })
    }

    /// Number of rows in `stock_prices`.
    pub fn row_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stock_prices", [], |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    // A negative limit means no limit in SQLite.
    fn query_history(&self, ticker: &str, limit: i64) -> Result<Vec<PriceObservation>> {
        let mut stmt = self.conn.prepare(SELECT_HISTORY)?;

        let rows = stmt
            .query_map(rusqlite::params![ticker, limit], |row| {
                Ok(PriceObservation {
                    date: row.get::<_, NaiveDateTime>(0)?.date(),
                    ticker: row.get(1)?,
                    close_price: row.get(2)?,
                    moving_avg_7d: row.get(3)?,
                    daily_return: row.get(4)?,
                    volatility_7d: row.get(5)?,
                    extracted_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read history for {}", ticker))?;

        Ok(rows)
    }
}
