//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the SMA of the first n values, then
//! EMA[i] = x[i]*k + EMA[i-1]*(1-k). The first n-1 values have no EMA.

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_ema(bars: &[Candle], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Ema(period),
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let values = bars
        .iter()
        .zip(ema_of(&closes, period))
        .map(|(bar, ema)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: ema.is_some(),
            value: IndicatorValue::Simple(ema.unwrap_or(0.0)),
        })
        .collect();

    IndicatorSeries {
        indicator_type: IndicatorType::Ema(period),
        values,
    }
}

/// EMA over a plain series, `None` until `period` values have been seen.
/// A zero period never produces a value.
pub fn ema_of(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut seed = 0.0;
    let mut ema: Option<f64> = None;

    for (i, &x) in values.iter().enumerate() {
        ema = match ema {
            Some(prev) => Some(x * k + prev * (1.0 - k)),
            None => {
                seed += x;
                (i + 1 == period).then(|| seed / period as f64)
            }
        };
        out.push(ema);
    }
    out
}
