//! Decision prompt rendering.
//!
//! `build_prompt` is a pure function of its inputs: the same indicator set,
//! run statistics, clock reading, position and template always render the
//! same bytes. Sections, in order: run statistics, market data per
//! timeframe, current position, instructions.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::domain::error::AgentError;
use crate::domain::indicator_set::{IndicatorSet, NamedSeries, TimeframeIndicators};
use crate::domain::position::Position;
use crate::domain::run_stats::RunStats;

pub const HOLD_BIAS: &str =
    "default to HOLD unless invalidation triggers or a clear reversal is evident";

const RULE: &str = "═══════════════════════════════════════════════════════════════";

pub const DEFAULT_TEMPLATE: &str = r#"TRADING INSTRUCTIONS

Decide one action for {instrument} based on the indicator series above and
your current position.

- HOLD: keep the current state (flat stays flat, open stays open)
- OPEN_LONG / OPEN_SHORT: enter at the current price; an opposite open
  closes the current position first
- CLOSE: exit the current position

Every open MUST include an invalidation_condition: the market condition that
proves the trade idea wrong. When it becomes true the position is closed
automatically. Use one or more comparisons joined by "and" / "or":
  price < 42000
  price closes below $42,000 on 3-minute candle
  RSI14 > 80 and price < EMA20
Operands: price, numbers, EMA<n>, RSI<n>, ATR<n>, MACD, MACD_SIGNAL,
MACD_HISTOGRAM (all on the intraday timeframe).
Comparators: <, <=, >, >=, below, above.

OUTPUT FORMAT

Respond with ONLY a JSON object:

{
  "action": "HOLD|OPEN_LONG|OPEN_SHORT|CLOSE",
  "invalidation_condition": "price < 42000",
  "stop_loss": 41500.0,
  "profit_target": 45000.0,
  "confidence": 0.75,
  "justification": "One sentence on why.",
  "summary": "One line describing the decision."
}

stop_loss and profit_target are price levels, not percentages, and are
optional. confidence is between 0.0 and 1.0."#;

/// Static instruction text appended after the market data. `{instrument}`
/// is replaced with the instrument symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub instructions: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let instructions = fs::read_to_string(path)?;
        Ok(Self { instructions })
    }

    fn render(&self, instrument: &str) -> String {
        self.instructions.replace("{instrument}", instrument)
    }
}

pub struct PromptInput<'a> {
    pub instrument: &'a str,
    pub indicators: &'a IndicatorSet,
    pub stats: &'a RunStats,
    pub now: DateTime<Utc>,
    pub position: &'a Position,
}

pub fn build_prompt(input: &PromptInput<'_>, template: &PromptTemplate) -> String {
    let mut output = String::new();
    output.push_str(&render_run_stats(input.stats, input.now));
    output.push_str(&render_market(input.instrument, input.indicators));
    output.push_str(&render_position(input.position, input.indicators.current_price));
    output.push_str(&render_banner("INSTRUCTIONS"));
    output.push_str(template.render(input.instrument).trim_end());
    output.push('\n');
    output
}

fn render_banner(title: &str) -> String {
    format!("{}\n{}\n{}\n\n", RULE, title, RULE)
}

fn render_run_stats(stats: &RunStats, now: DateTime<Utc>) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "It has been {} minutes since you started trading.\n",
        stats.elapsed_minutes(now)
    ));
    output.push_str(&format!(
        "Current Time: {}\n",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!("Invocation: {}\n\n", stats.next_invocation()));
    output
}

fn render_market(instrument: &str, set: &IndicatorSet) -> String {
    let mut output = render_banner(&format!("MARKET DATA FOR {}", instrument));
    let decimals = decimals_for(&[set.current_price]);
    output.push_str(&format!(
        "Current Price: {:.*}\n\n",
        decimals, set.current_price
    ));
    output.push_str(&render_timeframe("Intraday series", &set.base, set.series_length));
    output.push_str(&render_timeframe(
        "Longer-term context",
        &set.higher,
        set.series_length,
    ));
    output
}

fn render_timeframe(title: &str, tf: &TimeframeIndicators, n: usize) -> String {
    let mut output = format!(
        "{} ({} bars, oldest → latest):\n",
        title, tf.timeframe
    );
    for series in &tf.series {
        output.push_str(&render_series(series, n));
    }
    output.push('\n');
    output
}

fn render_series(series: &NamedSeries, n: usize) -> String {
    let name = match &series.period {
        Some(period) => format!("{} ({}-Period)", series.label, period),
        None => series.label.clone(),
    };

    if series.values.is_empty() {
        return format!("{}: insufficient data\n", name);
    }

    let decimals = decimals_for(&series.values);
    let values: Vec<String> = series
        .values
        .iter()
        .map(|v| format!("{:.*}", decimals, v))
        .collect();
    let mut line = format!("{}: [{}]", name, values.join(", "));
    if series.values.len() < n {
        line.push_str(&format!(" (warming up, {} of {})", series.values.len(), n));
    }
    line.push('\n');
    line
}

/// Fixed precision chosen from the largest magnitude in the series so every
/// value in one list shares a format.
fn decimals_for(values: &[f64]) -> usize {
    let max = values
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if max >= 1000.0 {
        2
    } else if max >= 10.0 {
        3
    } else if max >= 1.0 {
        4
    } else {
        6
    }
}

fn render_position(position: &Position, price: f64) -> String {
    let mut output = render_banner("CURRENT POSITION");
    let open = match position {
        Position::Flat => {
            output.push_str("No open position.\n\n");
            return output;
        }
        Position::Open(open) => open,
    };

    let decimals = decimals_for(&[open.entry_price, price]);
    output.push_str(&format!(
        "{} since {}\n",
        position.side(),
        open.entry_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!(
        "  - Entry Price: {:.*}\n",
        decimals, open.entry_price
    ));
    output.push_str(&format!("  - Current Price: {:.*}\n", decimals, price));
    output.push_str(&format!(
        "  - Unrealized P&L: {:+.2}%\n",
        open.unrealized_pnl_pct(price)
    ));
    if let Some(stop) = open.stop_loss {
        output.push_str(&format!("  - Stop Loss: {:.*}\n", decimals, stop));
    }
    if let Some(target) = open.profit_target {
        output.push_str(&format!("  - Profit Target: {:.*}\n", decimals, target));
    }
    output.push_str(&format!(
        "  - Invalidation Condition: {}\n\n",
        open.invalidation.text
    ));
    output.push_str(&format!(
        "You already hold this position: {}.\n\n",
        HOLD_BIAS
    ));
    output
}
