//! Binance spot klines price feed.
//!
//! `/api/v3/klines` returns at most 1000 bars per call, so longer histories
//! are fetched in pages walking backwards with `endTime`.

use std::time::Duration;

use chrono::DateTime;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::candle::Candle;
use crate::domain::error::AgentError;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;
use crate::ports::price_feed_port::PriceFeedPort;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_PAGE: usize = 1000;

pub struct BinanceFeed {
    client: Client,
    base_url: String,
    interval: String,
}

impl BinanceFeed {
    pub fn new(base_url: &str, timeframe: Timeframe, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Feed {
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            interval: interval_code(timeframe)?,
        })
    }

    /// Build from `[feed]` (`base_url`, `timeout_seconds`) and the base
    /// timeframe from `[indicators]`.
    pub fn from_config(config: &dyn ConfigPort, timeframe: Timeframe) -> Result<Self, AgentError> {
        let base_url = config
            .get_string("feed", "base_url")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = Duration::from_secs(config.get_int("feed", "timeout_seconds", 10).max(1) as u64);
        Self::new(&base_url, timeframe, timeout)
    }

    fn fetch_page(
        &self,
        instrument: &str,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, AgentError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let mut query = vec![
            ("symbol", instrument.to_string()),
            ("interval", self.interval.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        debug!(instrument, limit, ?end_time, "fetching klines");
        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .map_err(|e| AgentError::Feed {
                reason: format!("klines request for {} failed: {}", instrument, e),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Feed {
                reason: format!("HTTP {} fetching klines for {}", status, instrument),
            });
        }

        let body = resp.text().map_err(|e| AgentError::Feed {
            reason: format!("klines body for {} unreadable: {}", instrument, e),
        })?;
        parse_klines(&body)
    }
}

impl PriceFeedPort for BinanceFeed {
    fn fetch_candles(&self, instrument: &str, limit: usize) -> Result<Vec<Candle>, AgentError> {
        let mut pages: Vec<Vec<Candle>> = Vec::new();
        let mut remaining = limit;
        let mut end_time = None;

        while remaining > 0 {
            let page = self.fetch_page(instrument, remaining.min(MAX_PAGE), end_time)?;
            let Some(first) = page.first() else {
                break;
            };
            end_time = Some(first.timestamp.timestamp_millis() - 1);
            remaining = remaining.saturating_sub(page.len());
            let short = page.len() < MAX_PAGE;
            pages.push(page);
            if short {
                break;
            }
        }

        Ok(pages.into_iter().rev().flatten().collect())
    }
}

/// Binance interval code for a timeframe, e.g. `3m`, `4h`, `1d`.
pub fn interval_code(timeframe: Timeframe) -> Result<String, AgentError> {
    let code = match timeframe.minutes() {
        1 => "1m",
        3 => "3m",
        5 => "5m",
        15 => "15m",
        30 => "30m",
        60 => "1h",
        120 => "2h",
        240 => "4h",
        360 => "6h",
        480 => "8h",
        720 => "12h",
        1440 => "1d",
        _ => {
            return Err(AgentError::ConfigInvalid {
                section: "indicators".into(),
                key: "base_timeframe".into(),
                reason: format!("binance has no {} interval", timeframe),
            });
        }
    };
    Ok(code.to_string())
}

/// Decode a klines response: an array of
/// `[open_time, "open", "high", "low", "close", "volume", ...]` rows.
pub fn parse_klines(body: &str) -> Result<Vec<Candle>, AgentError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|e| AgentError::Feed {
        reason: format!("malformed klines body: {}", e),
    })?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let open_time = row.first().and_then(Value::as_i64).ok_or_else(|| AgentError::Feed {
                reason: format!("kline {}: missing open time", i),
            })?;
            let timestamp =
                DateTime::from_timestamp_millis(open_time).ok_or_else(|| AgentError::Feed {
                    reason: format!("kline {}: open time {} out of range", i, open_time),
                })?;
            Ok(Candle {
                timestamp,
                open: number(row, 1, i)?,
                high: number(row, 2, i)?,
                low: number(row, 3, i)?,
                close: number(row, 4, i)?,
                volume: number(row, 5, i)?,
            })
        })
        .collect()
}

fn number(row: &[Value], index: usize, kline: usize) -> Result<f64, AgentError> {
    let value = row.get(index);
    let parsed = match value {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| AgentError::Feed {
        reason: format!("kline {}: field {} is not a number", kline, index),
    })
}
