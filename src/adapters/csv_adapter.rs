//! CSV file price feed.
//!
//! One file per instrument, `<dir>/<instrument>.csv`, with a header row
//! `timestamp,open,high,low,close,volume`. Timestamps are RFC 3339 or epoch
//! milliseconds. Rows are returned in file order.

use crate::domain::candle::Candle;
use crate::domain::error::AgentError;
use crate::ports::config_port::ConfigPort;
use crate::ports::price_feed_port::PriceFeedPort;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;

pub struct CsvPriceFeed {
    base_path: PathBuf,
}

impl CsvPriceFeed {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, AgentError> {
        let dir = config.require_string("feed", "csv_dir")?;
        Ok(Self::new(PathBuf::from(dir)))
    }

    fn csv_path(&self, instrument: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", instrument))
    }
}

impl PriceFeedPort for CsvPriceFeed {
    fn fetch_candles(&self, instrument: &str, limit: usize) -> Result<Vec<Candle>, AgentError> {
        let path = self.csv_path(instrument);
        let content = fs::read_to_string(&path).map_err(|e| AgentError::Feed {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for (i, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| AgentError::Feed {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let row = i + 2;

            candles.push(Candle {
                timestamp: parse_timestamp(column(&record, 0, "timestamp", row)?, row)?,
                open: parse_price(column(&record, 1, "open", row)?, "open", row)?,
                high: parse_price(column(&record, 2, "high", row)?, "high", row)?,
                low: parse_price(column(&record, 3, "low", row)?, "low", row)?,
                close: parse_price(column(&record, 4, "close", row)?, "close", row)?,
                volume: parse_price(column(&record, 5, "volume", row)?, "volume", row)?,
            });
        }

        let skip = candles.len().saturating_sub(limit);
        Ok(candles.split_off(skip))
    }
}

fn column<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    name: &str,
    row: usize,
) -> Result<&'r str, AgentError> {
    record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| AgentError::Feed {
            reason: format!("row {}: missing {} column", row, name),
        })
}

fn parse_price(value: &str, name: &str, row: usize) -> Result<f64, AgentError> {
    value.parse().map_err(|e| AgentError::Feed {
        reason: format!("row {}: invalid {} value '{}': {}", row, name, value, e),
    })
}

fn parse_timestamp(value: &str, row: usize) -> Result<DateTime<Utc>, AgentError> {
    if let Ok(ms) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms).ok_or_else(|| AgentError::Feed {
            reason: format!("row {}: timestamp {} out of range", row, ms),
        });
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AgentError::Feed {
            reason: format!("row {}: invalid timestamp '{}': {}", row, value, e),
        })
}
