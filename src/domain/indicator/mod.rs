//! Technical indicator implementations.
//!
//! - `IndicatorPoint`: a single point in an indicator time series
//! - `IndicatorValue`: the output shape of an indicator at one bar
//! - `IndicatorType`: indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: a full-history time series, one point per input bar
//!
//! Every calculation is a pure function of the bars it is given. Nothing is
//! carried between calls, so recomputing from the same history always yields
//! the same series.

pub mod ema;
pub mod macd;
pub mod rsi;

pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;

use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
}

/// Which field of a (possibly multi-value) indicator to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorValue {
    /// Read one field; NaN when the field does not apply to this shape.
    pub fn field(&self, field: IndicatorField) -> f64 {
        match (self, field) {
            (IndicatorValue::Simple(v), IndicatorField::Value) => *v,
            (IndicatorValue::Macd { line, .. }, IndicatorField::MacdLine) => *line,
            (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => *signal,
            (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => *histogram,
            _ => f64::NAN,
        }
    }
}

impl IndicatorSeries {
    /// The last `n` valid values of `field`, oldest first. Warm-up points are
    /// skipped, never padded, so the result is shorter than `n` until enough
    /// history exists.
    pub fn tail(&self, n: usize, field: IndicatorField) -> Vec<f64> {
        let mut out: Vec<f64> = self
            .values
            .iter()
            .rev()
            .filter(|p| p.valid)
            .take(n)
            .map(|p| p.value.field(field))
            .collect();
        out.reverse();
        out
    }

    /// Value at the final bar, if that bar is past warm-up.
    pub fn latest(&self, field: IndicatorField) -> Option<f64> {
        self.values
            .last()
            .filter(|p| p.valid)
            .map(|p| p.value.field(field))
    }
}

impl IndicatorType {
    /// Snake-case name used in prompts and decision payloads, e.g. `ema_20`.
    pub fn key(&self) -> String {
        match self {
            IndicatorType::Ema(period) => format!("ema_{}", period),
            IndicatorType::Rsi(period) => format!("rsi_{}", period),
            IndicatorType::Atr(period) => format!("atr_{}", period),
            IndicatorType::Macd { .. } => "macd".to_string(),
        }
    }

    /// Minimum number of bars before the first valid point.
    pub fn warmup_bars(&self) -> usize {
        match self {
            IndicatorType::Ema(period) | IndicatorType::Atr(period) => *period,
            IndicatorType::Rsi(period) => period + 1,
            IndicatorType::Macd { slow, signal, .. } => slow + signal - 1,
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
        }
    }
}
