pub mod ingestion;
pub mod processing;

pub use ingestion::{PriceSource, YahooFinance};
pub use processing::{transform, PriceObservation};

// Re-export for tests
#[cfg(test)]
pub use ingestion::DailyClose;
