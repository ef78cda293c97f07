use crate::config::Config;
use crate::data::{transform, PriceSource};
use crate::warehouse::{LoadReport, Warehouse};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Counts from one ETL run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtlReport {
    pub closes_fetched: usize,
    pub rows_loaded: usize,
}

/// Runs fetch, transform and load once, in that order.
///
/// The window is `[now - window_days, now]` and every produced row is stamped
/// with `now`. The full window is recomputed and re-upserted on every call.
///
/// # Arguments
/// * `source`: Where daily closes come from
/// * `warehouse`: The store the rows are upserted into
/// * `config`: Tickers, window length and upsert mode
/// * `now`: Start of the run
///
/// # Errors
/// Returns the first fetch or load error; nothing is loaded in that case
pub async fn run_etl<S: PriceSource + ?Sized>(
    source: &S,
    warehouse: &mut Warehouse,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<EtlReport> {
    let start = now - Duration::days(config.window_days);
    info!(
        tickers = ?config.tickers,
        %start,
        end = %now,
        "fetching daily closes"
    );

    let closes = source.fetch_closes(&config.tickers, start, now).await?;
    let closes_fetched = closes.len();

    let rows = transform(closes, now.naive_utc());
    info!(closes = closes_fetched, rows = rows.len(), "computed rolling indicators");

    let LoadReport { rows: rows_loaded, mode } = warehouse.load(&rows, config.upsert_mode)?;
    info!(rows = rows_loaded, %mode, "upserted window");

    Ok(EtlReport {
        closes_fetched,
        rows_loaded,
    })
}
