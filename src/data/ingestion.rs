use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const CHART_API_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A single daily closing price for one ticker, as delivered by the provider.
///
/// # Fields
/// * `date`: The trading day in the exchange's local calendar
/// * `ticker`: The symbol the price belongs to
/// * `close`: The closing price for that day
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub ticker: String,
    pub close: f64,
}

/// Source of daily closing prices for a set of tickers.
///
/// The ETL run only depends on this trait, so the market-data provider can be
/// swapped for a fixed data set in tests.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetches daily closes for every ticker between `start` and `end`.
    ///
    /// A ticker without trading data in the window contributes no rows.
    /// Transport and provider failures are returned as errors.
    async fn fetch_closes(
        &self,
        tickers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>>;
}

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Fetches daily price history from the Yahoo Finance chart API.
///
/// Tickers are requested one at a time, in the order given.
pub struct YahooFinance {
    client: reqwest::Client,
}

impl YahooFinance {
    /// Creates a new `YahooFinance` client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    /// Fetches daily closes for a single ticker within a date range.
    ///
    /// # Arguments
    /// * `ticker`: The symbol to fetch (e.g., "CBA.AX")
    /// * `start`: The beginning of the window (inclusive)
    /// * `end`: The end of the window (inclusive)
    ///
    /// # Errors
    /// Returns an error if:
    /// - The HTTP request fails
    /// - The response body is not a chart response
    /// - The provider reports an error other than an unknown symbol
    ///
    /// # Returns
    /// The closes in the order the provider returned them, possibly empty
    pub async fn fetch_ticker(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>> {
        let url = format!("{}/{}", CHART_API_URL, ticker);
        debug!(%ticker, %url, "requesting chart data");

        // Unknown symbols come back as 404 with a JSON error body, so the
        // status is not checked before decoding.
        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", start.timestamp().to_string()),
                ("period2", end.timestamp().to_string()),
                ("interval", "1d".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("request for {} failed", ticker))?
            .json::<ChartResponse>()
            .await
            .with_context(|| format!("invalid chart response for {}", ticker))?;

        parse_chart_response(ticker, response)
    }
}

#[async_trait]
impl PriceSource for YahooFinance {
    async fn fetch_closes(
        &self,
        tickers: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>> {
        let mut closes = Vec::new();

        for ticker in tickers {
            let ticker_closes = self.fetch_ticker(ticker, start, end).await?;
            info!(%ticker, rows = ticker_closes.len(), "fetched daily closes");
            closes.extend(ticker_closes);
        }

        Ok(closes)
    }
}

/// Converts a chart API response into daily closes for `ticker`.
///
/// Bars with a null close (halts, holidays reported by the API) are skipped.
/// Timestamps are shifted by the exchange's GMT offset before the date is
/// taken, so a bar opening at 23:00 UTC on an exchange ten hours ahead lands
/// on the following calendar day.
///
/// # Errors
/// Returns an error if the provider reported anything other than "Not Found",
/// or if a timestamp is out of range
pub fn parse_chart_response(ticker: &str, response: ChartResponse) -> Result<Vec<DailyClose>> {
    let results = match response.chart.result {
        Some(results) => results,
        None => match response.chart.error {
            Some(err) if err.code == "Not Found" => {
                warn!(%ticker, description = %err.description, "ticker not found, skipping");
                return Ok(Vec::new());
            }
            Some(err) => bail!(
                "Yahoo Finance error for {}: {}: {}",
                ticker,
                err.code,
                err.description
            ),
            None => return Ok(Vec::new()),
        },
    };

    let Some(data) = results.into_iter().next() else {
        return Ok(Vec::new());
    };

    let Some(timestamps) = data.timestamp else {
        warn!(%ticker, "no trading data in window");
        return Ok(Vec::new());
    };

    let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let closes = data
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let mut daily = Vec::with_capacity(timestamps.len());

    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(close) = closes.get(i).copied().flatten() else {
            continue;
        };

        let date = DateTime::from_timestamp(ts + offset, 0)
            .with_context(|| format!("invalid timestamp {} for {}", ts, ticker))?
            .date_naive();

        daily.push(DailyClose {
            date,
            ticker: ticker.to_string(),
            close,
        });
    }

    Ok(daily)
}
