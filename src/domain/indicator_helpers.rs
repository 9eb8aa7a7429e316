//! Shared helper functions for indicator calculations.

use std::collections::HashMap;

use crate::domain::candle::Candle;
use crate::domain::indicator::{
    calculate_ema, calculate_macd, calculate_rsi, IndicatorPoint, IndicatorSeries, IndicatorType,
    IndicatorValue,
};

/// Average True Range with Wilder smoothing, seeded by the mean of the first
/// `period` true ranges. The first bar's true range is its high-low span.
pub fn calc_atr(bars: &[Candle], period: usize) -> IndicatorSeries {
    if bars.len() < period || period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: vec![],
        };
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut results: Vec<IndicatorPoint> = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        if i < period - 1 {
            results.push(IndicatorPoint {
                timestamp: bar.timestamp,
                valid: false,
                value: IndicatorValue::Simple(0.0),
            });
            continue;
        }

        atr = if i == period - 1 {
            tr_values[0..=i].iter().sum::<f64>() / period as f64
        } else {
            (atr * (period - 1) as f64 + tr_values[i]) / period as f64
        };
        results.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Simple(atr),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values: results,
    }
}

/// Compute a single indicator over the full history.
pub fn compute_indicator(bars: &[Candle], indicator_type: IndicatorType) -> IndicatorSeries {
    match indicator_type {
        IndicatorType::Ema(period) => calculate_ema(bars, period),
        IndicatorType::Rsi(period) => calculate_rsi(bars, period),
        IndicatorType::Atr(period) => calc_atr(bars, period),
        IndicatorType::Macd { fast, slow, signal } => calculate_macd(bars, fast, slow, signal),
    }
}

/// Compute each distinct indicator once, keyed by type.
pub fn compute_indicators(
    bars: &[Candle],
    types: &[IndicatorType],
) -> HashMap<IndicatorType, IndicatorSeries> {
    let mut out = HashMap::with_capacity(types.len());
    for indicator_type in types {
        out.entry(*indicator_type)
            .or_insert_with(|| compute_indicator(bars, *indicator_type));
    }
    out
}
