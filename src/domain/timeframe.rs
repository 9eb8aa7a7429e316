//! Bar widths and resampling of the base feed into higher timeframes.
//!
//! The higher timeframe is never a separate feed: its candles are built from
//! the base candles, so both timeframes always describe the same prices.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::domain::candle::Candle;

/// A uniform bar width, stored in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    minutes: NonZeroU32,
}

impl Timeframe {
    pub const MINUTE: Timeframe = Timeframe::new(NonZeroU32::MIN);

    pub const fn new(minutes: NonZeroU32) -> Self {
        Self { minutes }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        NonZeroU32::new(minutes).map(Self::new)
    }

    pub const fn minutes(&self) -> u32 {
        self.minutes.get()
    }

    /// True when `self` is a whole multiple of `base`.
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        self.minutes() % base.minutes() == 0
    }

    fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let width = i64::from(self.minutes()) * 60;
        let secs = timestamp.timestamp();
        let start = secs - secs.rem_euclid(width);
        DateTime::from_timestamp(start, 0).unwrap_or(timestamp)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.minutes();
        if m % 1440 == 0 {
            write!(f, "{}d", m / 1440)
        } else if m % 60 == 0 {
            write!(f, "{}h", m / 60)
        } else {
            write!(f, "{}m", m)
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    /// Accepts `15`, `15m`, `4h`, `1d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (digits, factor) = match s.chars().last() {
            Some('m') => (&s[..s.len() - 1], 1),
            Some('h') => (&s[..s.len() - 1], 60),
            Some('d') => (&s[..s.len() - 1], 1440),
            Some(c) if c.is_ascii_digit() => (s.as_str(), 1),
            _ => return Err(format!("invalid timeframe '{}'", s)),
        };
        let amount: u32 = digits
            .parse()
            .map_err(|_| format!("invalid timeframe '{}'", s))?;
        amount
            .checked_mul(factor)
            .and_then(Timeframe::from_minutes)
            .ok_or_else(|| format!("timeframe must be non-zero, got '{}'", s))
    }
}

/// Aggregate base candles into `target` buckets.
///
/// open = first, high = max, low = min, close = last, volume = sum; the
/// bucket timestamp is the bucket start. The trailing bucket is kept even if
/// it is still forming. Input must already be validated (strictly increasing).
pub fn resample(candles: &[Candle], target: Timeframe) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();

    for candle in candles {
        let start = target.bucket_start(candle.timestamp);
        match out.last_mut() {
            Some(current) if current.timestamp == start => {
                current.high = current.high.max(candle.high);
                current.low = current.low.min(candle.low);
                current.close = candle.close;
                current.volume += candle.volume;
            }
            _ => out.push(Candle {
                timestamp: start,
                ..candle.clone()
            }),
        }
    }

    out
}
