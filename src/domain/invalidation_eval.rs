//! Invalidation evaluation.
//!
//! Conditions are evaluated at the most recent base-timeframe bar. Price
//! operands read the supplied price (the current close, or the entry price
//! when checking a fresh open); indicator operands read the last point of
//! the full-history series.
//!
//! - `AND`: short-circuits on first `false`
//! - `OR`: short-circuits on first `true`
//! - a comparison with a NaN side (indicator still warming up) is `false`

use std::collections::HashMap;

use tracing::debug;

use crate::domain::candle::Candle;
use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::indicator_helpers::compute_indicators;
use crate::domain::invalidation::{IndicatorRef, InvalidationCondition, Operand, Rule};

pub fn evaluate(
    rule: &Rule,
    price: f64,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
) -> bool {
    match rule {
        Rule::Above { left, right } => compare(left, right, price, indicators, |l, r| l > r),
        Rule::Below { left, right } => compare(left, right, price, indicators, |l, r| l < r),
        Rule::AtOrAbove { left, right } => compare(left, right, price, indicators, |l, r| l >= r),
        Rule::AtOrBelow { left, right } => compare(left, right, price, indicators, |l, r| l <= r),
        Rule::And(rules) => rules.iter().all(|r| evaluate(r, price, indicators)),
        Rule::Or(rules) => rules.iter().any(|r| evaluate(r, price, indicators)),
    }
}

/// Compute what `condition` needs from `bars` and evaluate it at `price`.
pub fn is_triggered(condition: &InvalidationCondition, bars: &[Candle], price: f64) -> bool {
    let indicators = compute_indicators(bars, &condition.rule.required_indicators());
    evaluate(&condition.rule, price, &indicators)
}

fn compare(
    left: &Operand,
    right: &Operand,
    price: f64,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    op: impl Fn(f64, f64) -> bool,
) -> bool {
    let l = resolve_operand(left, price, indicators);
    let r = resolve_operand(right, price, indicators);
    if l.is_nan() || r.is_nan() {
        debug!(?left, ?right, "invalidation operand unavailable, comparison is false");
        return false;
    }
    op(l, r)
}

fn resolve_operand(
    operand: &Operand,
    price: f64,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
) -> f64 {
    match operand {
        Operand::Price => price,
        Operand::Constant(v) => *v,
        Operand::Indicator(ind_ref) => resolve_indicator(ind_ref, indicators),
    }
}

fn resolve_indicator(
    ind_ref: &IndicatorRef,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
) -> f64 {
    indicators
        .get(&ind_ref.indicator_type)
        .and_then(|series| series.latest(ind_ref.field))
        .unwrap_or(f64::NAN)
}
