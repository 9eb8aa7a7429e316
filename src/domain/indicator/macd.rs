//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: slow - 1 + signal - 1 bars

use crate::domain::candle::Candle;
use crate::domain::indicator::ema::ema_of;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[Candle],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };

    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let fast_ema = ema_of(&closes, fast);
    let slow_ema = ema_of(&closes, slow);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f.unwrap_or(0.0) - s.unwrap_or(0.0))
        .collect();

    // Signal is an EMA of the MACD line, started once both EMAs exist.
    let macd_warmup = (fast.max(slow) - 1).min(bars.len());
    let mut signal_line = vec![0.0; macd_warmup];
    signal_line.extend(
        ema_of(&macd_line[macd_warmup..], signal_period)
            .into_iter()
            .map(|v| v.unwrap_or(0.0)),
    );
    let signal_warmup = fast.max(slow) - 1 + signal_period - 1;

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| IndicatorPoint {
            timestamp: bar.timestamp,
            valid: i >= signal_warmup,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_line[i],
                histogram: macd_line[i] - signal_line[i],
            },
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[Candle]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::calculate_ema;
    use crate::domain::indicator::IndicatorField;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bars(prices: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::minutes(3 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn macd_warmup_default() {
        let bars = make_bars(&wave(40));
        let series = calculate_macd_default(&bars);

        assert_eq!(series.values.len(), 40);
        let first_valid = series.values.iter().position(|p| p.valid).unwrap();
        assert_eq!(first_valid, DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1);
    }

    #[test]
    fn macd_line_is_ema_difference() {
        let bars = make_bars(&wave(50));
        let series = calculate_macd(&bars, 3, 6, 4);
        let fast = calculate_ema(&bars, 3);
        let slow = calculate_ema(&bars, 6);

        let last = bars.len() - 1;
        let expected = fast.values[last].value.field(IndicatorField::Value)
            - slow.values[last].value.field(IndicatorField::Value);
        assert_abs_diff_eq!(
            series.values[last].value.field(IndicatorField::MacdLine),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn macd_signal_seed_is_mean_of_line() {
        let bars = make_bars(&wave(20));
        let series = calculate_macd(&bars, 2, 4, 3);

        // line valid from index 3, signal seeded at index 3 + 3 - 1 = 5
        let lines: Vec<f64> = (3..=5)
            .map(|i| series.values[i].value.field(IndicatorField::MacdLine))
            .collect();
        let seed = lines.iter().sum::<f64>() / 3.0;
        assert!(series.values[5].valid);
        assert!(!series.values[4].valid);
        assert_abs_diff_eq!(
            series.values[5].value.field(IndicatorField::MacdSignal),
            seed,
            epsilon = 1e-12
        );
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let bars = make_bars(&wave(60));
        let series = calculate_macd_default(&bars);
        for p in series.values.iter().filter(|p| p.valid) {
            if let IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } = p.value
            {
                assert_abs_diff_eq!(histogram, line - signal, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn macd_flat_prices_are_zero() {
        let bars = make_bars(&[50.0; 40]);
        let series = calculate_macd_default(&bars);
        let last = series.values.last().unwrap();
        assert!(last.valid);
        assert_abs_diff_eq!(last.value.field(IndicatorField::MacdLine), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(last.value.field(IndicatorField::MacdSignal), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn macd_insufficient_history_has_no_valid_points() {
        let bars = make_bars(&wave(20));
        let series = calculate_macd_default(&bars);
        assert_eq!(series.values.len(), 20);
        assert!(series.values.iter().all(|p| !p.valid));
    }

    #[test]
    fn macd_empty_or_zero_params() {
        assert!(calculate_macd_default(&[]).values.is_empty());
        let bars = make_bars(&wave(10));
        assert!(calculate_macd(&bars, 0, 26, 9).values.is_empty());
        assert!(calculate_macd(&bars, 12, 26, 0).values.is_empty());
    }
}
