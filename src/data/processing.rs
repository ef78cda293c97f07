use super::ingestion::DailyClose;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Number of observations in every rolling statistic.
pub const ROLLING_PERIOD: usize = 7;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// One row of the `stock_prices` table: a daily close enriched with rolling
/// statistics.
///
/// `(date, ticker)` identifies the row. Every derived field is populated;
/// observations without enough history never become a `PriceObservation`.
///
/// # Fields
/// * `date`: Trading day
/// * `ticker`: Symbol the row belongs to
/// * `close_price`: Closing price for the day
/// * `moving_avg_7d`: Mean of the trailing 7 closes, current day included
/// * `daily_return`: Fractional change against the previous close
/// * `volatility_7d`: Sample standard deviation of the daily returns within
///   the trailing 7 observations
/// * `extracted_at`: When the ETL run that produced the row started
pub struct PriceObservation {
    pub date: NaiveDate,
    pub ticker: String,
    pub close_price: f64,
    pub moving_avg_7d: f64,
    pub daily_return: f64,
    pub volatility_7d: f64,
    pub extracted_at: NaiveDateTime,
}

/// Derived values for one observation once the window is full.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStats {
    pub moving_average: f64,
    pub daily_return: f64,
    pub volatility: f64,
}

/// Rolling state for a single ticker's close series.
///
/// `RollingWindow` keeps the last `period` closes together with the daily
/// return of each, and computes the moving average and return volatility over
/// that window. Closes must be fed in ascending date order.
pub struct RollingWindow {
    price_history: VecDeque<f64>,
    return_history: VecDeque<Option<f64>>,
    last_close: Option<f64>,
    observations: usize,
    period: usize,
}

impl RollingWindow {
    /// Creates an empty window over `period` observations.
    pub fn new(period: usize) -> Self {
        Self {
            price_history: VecDeque::with_capacity(period),
            return_history: VecDeque::with_capacity(period),
            last_close: None,
            observations: 0,
            period,
        }
    }

    /// Pushes the next close and returns the rolling statistics for it.
    ///
    /// # Arguments
    /// * `close`: The closing price of the next trading day
    ///
    /// # Returns
    /// `None` until `period` closes have been seen, or when a statistic is not
    /// finite (a zero previous close, a window with a single defined return)
    pub fn process(&mut self, close: f64) -> Option<RollingStats> {
        let daily_return = self
            .last_close
            .map(|previous| (close - previous) / previous)
            .filter(|r| r.is_finite());
        self.last_close = Some(close);
        self.observations += 1;

        self.price_history.push_back(close);
        self.return_history.push_back(daily_return);
        if self.price_history.len() > self.period {
            self.price_history.pop_front();
            self.return_history.pop_front();
        }

        if self.price_history.len() < self.period {
            return None;
        }

        Some(RollingStats {
            moving_average: self.calculate_moving_average(),
            daily_return: daily_return?,
            volatility: self.calculate_volatility()?,
        })
    }

    fn calculate_moving_average(&self) -> f64 {
        self.price_history.iter().sum::<f64>() / self.price_history.len() as f64
    }

    /// Sample standard deviation of the returns in the window.
    ///
    /// Only the series' very first observation may lack a return; any other
    /// undefined return in the window makes the volatility undefined.
    fn calculate_volatility(&self) -> Option<f64> {
        let first_window = self.observations == self.period;
        let mut returns = Vec::with_capacity(self.return_history.len());
        for (i, r) in self.return_history.iter().enumerate() {
            match r {
                Some(r) => returns.push(*r),
                None if i == 0 && first_window => {}
                None => return None,
            }
        }
        if returns.len() < 2 {
            return None;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns
            .iter()
            .map(|&r| {
                let diff = r - mean;
                diff * diff
            })
            .sum::<f64>()
            / (returns.len() - 1) as f64;

        Some(variance.sqrt()).filter(|v| v.is_finite())
    }
}

/// Turns raw closes for any number of tickers into warehouse rows.
///
/// Closes are grouped by ticker and sorted by date, keeping the last close
/// seen for a repeated date; each ticker gets its own
/// `RollingWindow`, so series never bleed into each other. The first
/// `ROLLING_PERIOD - 1` dates of every ticker are dropped.
///
/// # Arguments
/// * `closes`: Raw closes in any order
/// * `extracted_at`: Timestamp stamped on every produced row
///
/// # Returns
/// Rows grouped by ticker, ascending by date within a ticker
pub fn transform(closes: Vec<DailyClose>, extracted_at: NaiveDateTime) -> Vec<PriceObservation> {
    // A later close for the same date replaces the earlier one.
    let mut by_ticker: BTreeMap<String, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for close in closes {
        by_ticker
            .entry(close.ticker)
            .or_default()
            .insert(close.date, close.close);
    }

    let mut rows = Vec::new();

    for (ticker, series) in by_ticker {
        let mut window = RollingWindow::new(ROLLING_PERIOD);
        for (date, close) in series {
            if let Some(stats) = window.process(close) {
                rows.push(PriceObservation {
                    date,
                    ticker: ticker.clone(),
                    close_price: close,
                    moving_avg_7d: stats.moving_average,
                    daily_return: stats.daily_return,
                    volatility_7d: stats.volatility,
                    extracted_at,
                });
            }
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn create_test_closes(ticker: &str, prices: &[f64]) -> Vec<DailyClose> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| DailyClose {
                date: start + Duration::days(i as i64),
                ticker: ticker.to_string(),
                close,
            })
            .collect()
    }

    fn sample_std(values: &[f64]) -> f64 {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (sum_sq / (values.len() - 1) as f64).sqrt()
    }

    #[test]
    fn test_seven_day_example() {
        let now = Utc::now().naive_utc();
        let closes = create_test_closes("TEST", &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);

        let rows = transform(closes, now);
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());
        assert_eq!(row.close_price, 16.0);
        assert_eq!(row.moving_avg_7d, 13.0);
        assert!((row.daily_return - 1.0 / 15.0).abs() < 1e-12);
        assert!((row.daily_return - 0.0667).abs() < 1e-4);
        assert_eq!(row.extracted_at, now);

        let returns: Vec<f64> = (11..=16).map(|p| 1.0 / (p - 1) as f64).collect();
        assert!((row.volatility_7d - sample_std(&returns)).abs() < 1e-12);
    }

    #[test]
    fn test_first_six_dates_dropped() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let closes = create_test_closes("TEST", &prices);
        let first_kept = closes[6].date;

        let rows = transform(closes, Utc::now().naive_utc());
        assert_eq!(rows.len(), 24);
        assert_eq!(rows[0].date, first_kept);
        assert!(rows.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_volatility_uses_trailing_seven_returns() {
        let prices = [10.0, 11.0, 10.5, 12.0, 11.0, 11.5, 13.0, 12.5, 12.0];
        let rows = transform(create_test_closes("TEST", &prices), Utc::now().naive_utc());
        assert_eq!(rows.len(), 3);

        let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
        let last = rows.last().unwrap();
        assert!((last.volatility_7d - sample_std(&returns[1..8])).abs() < 1e-12);

        let mean: f64 = prices[2..9].iter().sum::<f64>() / 7.0;
        assert!((last.moving_avg_7d - mean).abs() < 1e-12);
    }

    #[test]
    fn test_tickers_processed_independently() {
        let mut closes = create_test_closes("AAA", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        closes.extend(create_test_closes("BBB", &[50.0, 51.0, 52.0, 53.0, 54.0, 55.0, 56.0]));
        closes.extend(create_test_closes("CCC", &[9.0, 9.5, 10.0]));
        closes.reverse();

        let rows = transform(closes, Utc::now().naive_utc());

        let aaa: Vec<_> = rows.iter().filter(|r| r.ticker == "AAA").collect();
        let bbb: Vec<_> = rows.iter().filter(|r| r.ticker == "BBB").collect();
        assert_eq!(aaa.len(), 2);
        assert_eq!(bbb.len(), 1);
        assert!(rows.iter().all(|r| r.ticker != "CCC"));
        assert_eq!(aaa[0].moving_avg_7d, 4.0);
        assert_eq!(bbb[0].moving_avg_7d, 53.0);
    }

    #[test]
    fn test_repeated_date_keeps_last_close() {
        let mut closes = create_test_closes(
            "CBA.AX",
            &[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0, 107.0],
        );
        let mut live_bar = closes.last().unwrap().clone();
        live_bar.close = 107.5;
        closes.push(live_bar);

        let rows = transform(closes, Utc::now().naive_utc());
        assert_eq!(rows.len(), 2);

        let last = &rows[1];
        assert_eq!(last.date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(last.close_price, 107.5);
        let mean = (101.0 + 102.0 + 103.0 + 104.0 + 105.0 + 106.0 + 107.5) / 7.0;
        assert!((last.moving_avg_7d - mean).abs() < 1e-12);
        assert!((last.daily_return - 1.5 / 106.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_return_drops_rows_until_it_leaves_window() {
        let prices = [
            10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 0.0, 17.0, 18.0, 19.0, 20.0, 21.0, 22.0,
            23.0, 24.0, 25.0,
        ];
        let closes = create_test_closes("TEST", &prices);
        let expected: Vec<NaiveDate> = [6, 7, 15, 16].iter().map(|&i| closes[i].date).collect();

        let rows = transform(closes, Utc::now().naive_utc());
        let dates: Vec<NaiveDate> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, expected);

        let returns: Vec<f64> = prices[9..16].windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
        let mut trailing = vec![(prices[9] - prices[8]) / prices[8]];
        trailing.extend(returns);
        assert!((rows[2].volatility_7d - sample_std(&trailing)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(transform(Vec::new(), Utc::now().naive_utc()).is_empty());
    }

    #[test]
    fn test_window_needs_full_period() {
        let mut window = RollingWindow::new(ROLLING_PERIOD);
        for price in [10.0, 11.0, 12.0, 13.0, 14.0, 15.0] {
            assert!(window.process(price).is_none());
        }
        assert!(window.process(16.0).is_some());
    }
}
