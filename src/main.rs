mod config;
mod data;
mod pipeline;
mod warehouse;

use chrono::Utc;
use config::Config;
use data::YahooFinance;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warehouse::Warehouse;

/// Prints the headline figures of every ticker in the warehouse.
///
/// Tickers with fewer than two stored rows have no previous close to compare
/// against; they are reported and skipped.
///
/// # Arguments
/// * `warehouse`: The store to read from
///
/// # Errors
/// Returns an error if the stored rows cannot be read
fn print_warehouse_snapshot(warehouse: &Warehouse) -> anyhow::Result<()> {
    println!("\nWarehouse Snapshot:");

    for ticker in warehouse.distinct_tickers()? {
        let stored_rows = warehouse.ticker_history(&ticker)?.len();
        match warehouse.latest_snapshot(&ticker) {
            Ok(snapshot) => {
                println!(
                    "{}: ${:.2} (prev ${:.2}, {:+.2}%) | 7D volatility {:.4} \
                     | last updated {} | {} rows",
                    snapshot.ticker,
                    snapshot.latest_price,
                    snapshot.previous_price,
                    snapshot.delta_pct,
                    snapshot.volatility_7d,
                    snapshot.last_updated.format("%d-%m-%Y"),
                    stored_rows,
                );
            }
            Err(e) => warn!(%ticker, error = %e, "no snapshot available"),
        }
    }

    Ok(())
}

/// Entry point: one ETL run against the configured warehouse.
///
/// 1. Load `.env` and initialise logging
/// 2. Resolve configuration and open the warehouse
/// 3. Fetch, transform and upsert the trailing window
/// 4. Print a snapshot of each stored ticker
///
/// Any failure aborts the run before the completion message is printed.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Starting ETL process...");

    let config = Config::from_env()?;
    info!(
        database = ?config.database_url,
        tickers = ?config.tickers,
        window_days = config.window_days,
        upsert_mode = %config.upsert_mode,
        "resolved configuration"
    );

    let mut warehouse = Warehouse::open(&config.database_url)?;
    warehouse.ensure_schema()?;
    let source = YahooFinance::new()?;

    let report = pipeline::run_etl(&source, &mut warehouse, &config, Utc::now()).await?;
    info!(
        closes = report.closes_fetched,
        rows = report.rows_loaded,
        total_rows = warehouse.row_count()?,
        "run finished"
    );

    print_warehouse_snapshot(&warehouse)?;

    println!("ETL process completed");
    Ok(())
}
