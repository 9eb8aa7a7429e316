//! Bounded indicator series for the decision prompt.
//!
//! Given the raw base-timeframe history, produce for each timeframe an
//! ordered list of named series holding the last N valid values, oldest
//! first. Everything is recomputed from the full history on every call.

use chrono::{DateTime, Utc};

use crate::domain::candle::{validate_candles, Candle};
use crate::domain::error::AgentError;
use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW};
use crate::domain::indicator::{IndicatorField, IndicatorType};
use crate::domain::indicator_helpers::compute_indicator;
use crate::domain::timeframe::{resample, Timeframe};

pub const DEFAULT_SERIES_LENGTH: usize = 10;

/// Which indicators to compute on one timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeSpec {
    pub timeframe: Timeframe,
    pub ema_periods: Vec<usize>,
    pub rsi_periods: Vec<usize>,
    pub macd: Option<(usize, usize, usize)>,
    pub atr_period: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub series_length: usize,
    pub base: TimeframeSpec,
    pub higher: TimeframeSpec,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        let macd = Some((DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL));
        IndicatorConfig {
            series_length: DEFAULT_SERIES_LENGTH,
            base: TimeframeSpec {
                timeframe: Timeframe::from_minutes(3).unwrap_or(Timeframe::MINUTE),
                ema_periods: vec![20],
                rsi_periods: vec![7, 14],
                macd,
                atr_period: Some(14),
            },
            higher: TimeframeSpec {
                timeframe: Timeframe::from_minutes(240).unwrap_or(Timeframe::MINUTE),
                ema_periods: vec![20, 50],
                rsi_periods: vec![14],
                macd,
                atr_period: Some(14),
            },
        }
    }
}

impl TimeframeSpec {
    pub fn indicator_types(&self) -> Vec<IndicatorType> {
        let mut types: Vec<IndicatorType> =
            self.ema_periods.iter().map(|&p| IndicatorType::Ema(p)).collect();
        if let Some((fast, slow, signal)) = self.macd {
            types.push(IndicatorType::Macd { fast, slow, signal });
        }
        types.extend(self.rsi_periods.iter().map(|&p| IndicatorType::Rsi(p)));
        types.extend(self.atr_period.map(IndicatorType::Atr));
        types
    }

    /// Bars of this timeframe needed before every series holds `n` values.
    pub fn bars_for_full_series(&self, n: usize) -> usize {
        let warmup = self
            .indicator_types()
            .iter()
            .map(IndicatorType::warmup_bars)
            .max()
            .unwrap_or(1)
            .max(1);
        warmup + n.saturating_sub(1)
    }
}

impl IndicatorConfig {
    /// Base-timeframe bars needed to fill every series on both timeframes.
    /// The higher timeframe gets one spare bucket since the oldest one is
    /// usually partial.
    pub fn min_history(&self) -> usize {
        let n = self.series_length;
        let ratio = (self.higher.timeframe.minutes() / self.base.timeframe.minutes().max(1))
            .max(1) as usize;
        let higher = (self.higher.bars_for_full_series(n) + 1) * ratio;
        higher.max(self.base.bars_for_full_series(n))
    }

    /// MACD parameters of the base timeframe, used when an invalidation
    /// condition mentions MACD without parameters.
    pub fn base_macd(&self) -> (usize, usize, usize) {
        self.base
            .macd
            .unwrap_or((DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL))
    }
}

/// A bounded, prompt-facing series.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedSeries {
    pub name: String,
    pub label: String,
    pub period: Option<String>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeIndicators {
    pub timeframe: Timeframe,
    pub bars: usize,
    pub series: Vec<NamedSeries>,
}

impl TimeframeIndicators {
    pub fn get(&self, name: &str) -> Option<&NamedSeries> {
        self.series.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub series_length: usize,
    pub current_price: f64,
    pub as_of: DateTime<Utc>,
    pub base: TimeframeIndicators,
    pub higher: TimeframeIndicators,
}

/// Validate the raw feed and compute both timeframes.
///
/// Returns an input error for an empty, malformed or out-of-order history.
/// Short histories are fine: the affected series are simply shorter.
pub fn compute_indicator_set(
    instrument: &str,
    candles: &[Candle],
    config: &IndicatorConfig,
) -> Result<IndicatorSet, AgentError> {
    validate_candles(instrument, candles)?;

    let last = candles.last().ok_or_else(|| AgentError::InsufficientData {
        instrument: instrument.to_string(),
        bars: 0,
        minimum: 1,
    })?;

    let base_bars = base_candles(candles, config.base.timeframe);
    let higher_bars = resample(candles, config.higher.timeframe);

    Ok(IndicatorSet {
        series_length: config.series_length,
        current_price: last.close,
        as_of: last.timestamp,
        base: compute_timeframe(&base_bars, &config.base, config.series_length),
        higher: compute_timeframe(&higher_bars, &config.higher, config.series_length),
    })
}

/// The feed as base-timeframe bars: unchanged when the feed already has the
/// base width, resampled otherwise.
pub fn base_candles(candles: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    if timeframe.minutes() == candles_width(candles) {
        candles.to_vec()
    } else {
        resample(candles, timeframe)
    }
}

/// Compute the bounded series for one timeframe from its own bars.
pub fn compute_timeframe(bars: &[Candle], spec: &TimeframeSpec, n: usize) -> TimeframeIndicators {
    let mut series = Vec::new();

    let closes: Vec<f64> = bars.iter().rev().take(n).rev().map(|b| b.close).collect();
    series.push(NamedSeries {
        name: "price".to_string(),
        label: "Close".to_string(),
        period: None,
        values: closes,
    });

    for &period in &spec.ema_periods {
        let full = compute_indicator(bars, IndicatorType::Ema(period));
        series.push(NamedSeries {
            name: IndicatorType::Ema(period).key(),
            label: "EMA".to_string(),
            period: Some(period.to_string()),
            values: full.tail(n, IndicatorField::Value),
        });
    }

    if let Some((fast, slow, signal)) = spec.macd {
        let full = compute_indicator(bars, IndicatorType::Macd { fast, slow, signal });
        let period = format!("{},{},{}", fast, slow, signal);
        for (name, label, field) in [
            ("macd", "MACD", IndicatorField::MacdLine),
            ("macd_signal", "MACD Signal", IndicatorField::MacdSignal),
            ("macd_histogram", "MACD Histogram", IndicatorField::MacdHistogram),
        ] {
            series.push(NamedSeries {
                name: name.to_string(),
                label: label.to_string(),
                period: Some(period.clone()),
                values: full.tail(n, field),
            });
        }
    }

    for &period in &spec.rsi_periods {
        let full = compute_indicator(bars, IndicatorType::Rsi(period));
        series.push(NamedSeries {
            name: IndicatorType::Rsi(period).key(),
            label: "RSI".to_string(),
            period: Some(period.to_string()),
            values: full.tail(n, IndicatorField::Value),
        });
    }

    if let Some(period) = spec.atr_period {
        let full = compute_indicator(bars, IndicatorType::Atr(period));
        series.push(NamedSeries {
            name: IndicatorType::Atr(period).key(),
            label: "ATR".to_string(),
            period: Some(period.to_string()),
            values: full.tail(n, IndicatorField::Value),
        });
    }

    TimeframeIndicators {
        timeframe: spec.timeframe,
        bars: bars.len(),
        series,
    }
}

/// Width of the feed in minutes, taken from the smallest gap between bars.
fn candles_width(candles: &[Candle]) -> u32 {
    candles
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_minutes())
        .filter(|m| *m > 0)
        .min()
        .map(|m| m as u32)
        .unwrap_or(0)
}
