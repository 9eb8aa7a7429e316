//! Candle (price bar) representation and feed validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::AgentError;

/// One OHLCV bar. `timestamp` is the bar open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Reject a price history the indicator engine cannot trust.
///
/// Timestamps must be strictly increasing, prices finite and positive, and
/// `low <= high`. An empty history is an error too: there is no current
/// price to act on.
pub fn validate_candles(instrument: &str, candles: &[Candle]) -> Result<(), AgentError> {
    if candles.is_empty() {
        return Err(AgentError::InsufficientData {
            instrument: instrument.to_string(),
            bars: 0,
            minimum: 1,
        });
    }

    for (i, candle) in candles.iter().enumerate() {
        let prices = [candle.open, candle.high, candle.low, candle.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(AgentError::InvalidPriceData {
                instrument: instrument.to_string(),
                reason: format!("bar {} at {} has a non-positive price", i, candle.timestamp),
            });
        }
        if !candle.volume.is_finite() || candle.volume < 0.0 {
            return Err(AgentError::InvalidPriceData {
                instrument: instrument.to_string(),
                reason: format!("bar {} at {} has an invalid volume", i, candle.timestamp),
            });
        }
        if candle.low > candle.high {
            return Err(AgentError::InvalidPriceData {
                instrument: instrument.to_string(),
                reason: format!("bar {} at {} has low above high", i, candle.timestamp),
            });
        }
        if i > 0 && candle.timestamp <= candles[i - 1].timestamp {
            return Err(AgentError::InvalidPriceData {
                instrument: instrument.to_string(),
                reason: format!(
                    "timestamps not strictly increasing at bar {} ({} after {})",
                    i,
                    candle.timestamp,
                    candles[i - 1].timestamp
                ),
            });
        }
    }

    Ok(())
}
