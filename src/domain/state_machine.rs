//! Position state machine.
//!
//! `apply` is the only way a position changes. It is pure: the caller
//! commits the returned position only after the cycle's record is stored.
//!
//! Order of evaluation:
//! 1. forced exit check on an open position (invalidation, stop loss,
//!    profit target); a trigger closes to FLAT and the model's decision is
//!    not applied this cycle
//! 2. minimum holding time (model-chosen CLOSE or flip becomes HOLD)
//! 3. the (state, action) transition

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::candle::Candle;
use crate::domain::decision::{Action, Decision};
use crate::domain::invalidation::InvalidationCondition;
use crate::domain::invalidation_eval::is_triggered;
use crate::domain::position::{OpenPosition, Position, Side};

/// Market state for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct MarketContext<'a> {
    pub price: f64,
    pub time: DateTime<Utc>,
    /// Base-timeframe history used to evaluate indicator operands.
    pub base_bars: &'a [Candle],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRules {
    /// 0 disables the minimum holding time.
    pub min_hold_minutes: i64,
    pub macd: (usize, usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    Invalidation(String),
    StopLoss(f64),
    ProfitTarget(f64),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Invalidation(text) => write!(f, "invalidation triggered: {}", text),
            ExitReason::StopLoss(level) => write!(f, "stop loss hit at {}", level),
            ExitReason::ProfitTarget(level) => write!(f, "profit target hit at {}", level),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Unchanged,
    AlreadyPositioned,
    Opened { side: Side, price: f64 },
    Closed { side: Side, price: f64 },
    ForcedExit { side: Side, price: f64, reason: ExitReason },
    OpenRejected { reason: String },
    HoldEnforced { held_minutes: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub position: Position,
    pub events: Vec<PositionEvent>,
    /// The model's decision was not applied because a forced exit fired.
    pub overridden: bool,
}

impl Step {
    fn unchanged(position: &Position, event: PositionEvent) -> Self {
        Self {
            position: position.clone(),
            events: vec![event],
            overridden: false,
        }
    }
}

pub fn apply(
    position: &Position,
    decision: &Decision,
    market: &MarketContext<'_>,
    rules: &PositionRules,
) -> Step {
    if let Position::Open(open) = position {
        if let Some(reason) = forced_exit(open, market) {
            return Step {
                position: Position::Flat,
                events: vec![PositionEvent::ForcedExit {
                    side: open.side,
                    price: market.price,
                    reason,
                }],
                overridden: true,
            };
        }
    }

    let requested = match decision.action {
        Action::OpenLong => Some(Side::Long),
        Action::OpenShort => Some(Side::Short),
        Action::Hold | Action::Close => None,
    };

    match position {
        Position::Flat => match requested {
            None => Step::unchanged(position, PositionEvent::Unchanged),
            Some(side) => {
                let (position, event) = open_or_reject(side, decision, market, rules);
                Step {
                    position,
                    events: vec![event],
                    overridden: false,
                }
            }
        },
        Position::Open(open) => {
            let wants_exit = decision.action == Action::Close
                || requested.is_some_and(|side| side == open.side.opposite());

            if requested == Some(open.side) {
                return Step::unchanged(position, PositionEvent::AlreadyPositioned);
            }
            if !wants_exit {
                return Step::unchanged(position, PositionEvent::Unchanged);
            }

            let held_minutes = open.held_minutes(market.time);
            if rules.min_hold_minutes > 0 && held_minutes < rules.min_hold_minutes {
                return Step::unchanged(position, PositionEvent::HoldEnforced { held_minutes });
            }

            let mut events = vec![PositionEvent::Closed {
                side: open.side,
                price: market.price,
            }];
            let position = match requested {
                Some(side) => {
                    let (position, event) = open_or_reject(side, decision, market, rules);
                    events.push(event);
                    position
                }
                None => Position::Flat,
            };
            Step {
                position,
                events,
                overridden: false,
            }
        }
    }
}

fn forced_exit(open: &OpenPosition, market: &MarketContext<'_>) -> Option<ExitReason> {
    if is_triggered(&open.invalidation, market.base_bars, market.price) {
        return Some(ExitReason::Invalidation(open.invalidation.text.clone()));
    }
    if open.should_stop_loss(market.price) {
        return open.stop_loss.map(ExitReason::StopLoss);
    }
    if open.should_take_profit(market.price) {
        return open.profit_target.map(ExitReason::ProfitTarget);
    }
    None
}

fn open_or_reject(
    side: Side,
    decision: &Decision,
    market: &MarketContext<'_>,
    rules: &PositionRules,
) -> (Position, PositionEvent) {
    match build_open(side, decision, market, rules) {
        Ok(open) => (
            Position::Open(open),
            PositionEvent::Opened {
                side,
                price: market.price,
            },
        ),
        Err(reason) => (Position::Flat, PositionEvent::OpenRejected { reason }),
    }
}

fn build_open(
    side: Side,
    decision: &Decision,
    market: &MarketContext<'_>,
    rules: &PositionRules,
) -> Result<OpenPosition, String> {
    let text = decision
        .invalidation_condition
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "missing invalidation condition".to_string())?;

    let invalidation = InvalidationCondition::parse(text, rules.macd)
        .map_err(|e| format!("unparseable invalidation condition '{}': {}", text, e))?;

    if is_triggered(&invalidation, market.base_bars, market.price) {
        return Err(format!(
            "invalidation condition '{}' is already true at entry price {}",
            text, market.price
        ));
    }

    // Levels on the wrong side of entry would fire immediately; drop them.
    let (stop_loss, profit_target) = match side {
        Side::Long => (
            decision.stop_loss.filter(|s| *s < market.price),
            decision.profit_target.filter(|t| *t > market.price),
        ),
        Side::Short => (
            decision.stop_loss.filter(|s| *s > market.price),
            decision.profit_target.filter(|t| *t < market.price),
        ),
    };

    Ok(OpenPosition {
        side,
        entry_price: market.price,
        entry_time: market.time,
        invalidation,
        stop_loss,
        profit_target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const RULES: PositionRules = PositionRules {
        min_hold_minutes: 0,
        macd: (12, 26, 9),
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn bars(price: f64) -> Vec<Candle> {
        (0..5)
            .map(|i| Candle {
                timestamp: t0() + Duration::minutes(3 * i),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1.0,
            })
            .collect()
    }

    fn decision(action: Action, invalidation: Option<&str>) -> Decision {
        Decision {
            action,
            invalidation_condition: invalidation.map(str::to_string),
            ..Decision::hold()
        }
    }

    fn long_at(price: f64, invalidation: &str) -> Position {
        Position::Open(OpenPosition {
            side: Side::Long,
            entry_price: price,
            entry_time: t0(),
            invalidation: InvalidationCondition::parse(invalidation, RULES.macd).unwrap(),
            stop_loss: None,
            profit_target: None,
        })
    }

    #[test]
    fn flat_open_long_records_entry() {
        let history = bars(105.0);
        let market = MarketContext {
            price: 105.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &Position::Flat,
            &decision(Action::OpenLong, Some("price < 100")),
            &market,
            &RULES,
        );

        let open = step.position.as_open().unwrap();
        assert_eq!(open.side, Side::Long);
        assert_eq!(open.entry_price, 105.0);
        assert_eq!(open.entry_time, t0());
        assert_eq!(open.invalidation.text, "price < 100");
        assert_eq!(
            step.events,
            vec![PositionEvent::Opened {
                side: Side::Long,
                price: 105.0
            }]
        );
    }

    #[test]
    fn open_without_invalidation_is_rejected() {
        let history = bars(105.0);
        let market = MarketContext {
            price: 105.0,
            time: t0(),
            base_bars: &history,
        };
        for text in [None, Some("   "), Some("when it feels wrong")] {
            let step = apply(
                &Position::Flat,
                &decision(Action::OpenShort, text),
                &market,
                &RULES,
            );
            assert_eq!(step.position, Position::Flat);
            assert!(matches!(step.events[0], PositionEvent::OpenRejected { .. }));
        }
    }

    #[test]
    fn open_with_already_true_invalidation_is_rejected() {
        let history = bars(95.0);
        let market = MarketContext {
            price: 95.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &Position::Flat,
            &decision(Action::OpenLong, Some("price < 100")),
            &market,
            &RULES,
        );
        assert_eq!(step.position, Position::Flat);
        match &step.events[0] {
            PositionEvent::OpenRejected { reason } => assert!(reason.contains("already true")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn invalidation_forces_close_and_overrides_model() {
        let history = bars(95.0);
        let market = MarketContext {
            price: 95.0,
            time: t0() + Duration::minutes(30),
            base_bars: &history,
        };
        let step = apply(
            &long_at(105.0, "price < 100"),
            &decision(Action::Hold, None),
            &market,
            &RULES,
        );
        assert_eq!(step.position, Position::Flat);
        assert!(step.overridden);
        assert!(matches!(
            &step.events[0],
            PositionEvent::ForcedExit {
                reason: ExitReason::Invalidation(text),
                ..
            } if text == "price < 100"
        ));
    }

    #[test]
    fn forced_exit_wins_over_flip() {
        let history = bars(95.0);
        let market = MarketContext {
            price: 95.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &long_at(105.0, "price < 100"),
            &decision(Action::OpenShort, Some("price > 120")),
            &market,
            &RULES,
        );
        assert_eq!(step.position, Position::Flat);
        assert_eq!(step.events.len(), 1);
    }

    #[test]
    fn stop_loss_and_profit_target_force_exit() {
        let history = bars(105.0);
        let market = |price| MarketContext {
            price,
            time: t0(),
            base_bars: &history,
        };

        let mut position = long_at(105.0, "price < 50");
        if let Position::Open(open) = &mut position {
            open.stop_loss = Some(100.0);
            open.profit_target = Some(120.0);
        }

        let hold = decision(Action::Hold, None);
        let step = apply(&position, &hold, &market(99.0), &RULES);
        assert!(matches!(
            step.events[0],
            PositionEvent::ForcedExit {
                reason: ExitReason::StopLoss(_),
                ..
            }
        ));

        let step = apply(&position, &hold, &market(121.0), &RULES);
        assert!(matches!(
            step.events[0],
            PositionEvent::ForcedExit {
                reason: ExitReason::ProfitTarget(_),
                ..
            }
        ));

        let step = apply(&position, &hold, &market(110.0), &RULES);
        assert_eq!(step.position, position);
    }

    #[test]
    fn hold_leaves_entry_untouched() {
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0() + Duration::hours(2),
            base_bars: &history,
        };
        let position = long_at(105.0, "price < 100");
        let step = apply(&position, &decision(Action::Hold, None), &market, &RULES);
        assert_eq!(step.position, position);
        assert_eq!(step.events, vec![PositionEvent::Unchanged]);
    }

    #[test]
    fn close_goes_flat() {
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &long_at(105.0, "price < 100"),
            &decision(Action::Close, None),
            &market,
            &RULES,
        );
        assert_eq!(step.position, Position::Flat);
        assert!(matches!(step.events[0], PositionEvent::Closed { .. }));
    }

    #[test]
    fn same_side_open_is_noop() {
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0(),
            base_bars: &history,
        };
        let position = long_at(105.0, "price < 100");
        let step = apply(
            &position,
            &decision(Action::OpenLong, Some("price < 105")),
            &market,
            &RULES,
        );
        assert_eq!(step.position, position);
        assert_eq!(step.events, vec![PositionEvent::AlreadyPositioned]);
    }

    #[test]
    fn flip_closes_then_opens() {
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &long_at(105.0, "price < 100"),
            &decision(Action::OpenShort, Some("price > 115")),
            &market,
            &RULES,
        );
        let open = step.position.as_open().unwrap();
        assert_eq!(open.side, Side::Short);
        assert_eq!(open.entry_price, 110.0);
        assert_eq!(step.events.len(), 2);
        assert!(matches!(step.events[0], PositionEvent::Closed { side: Side::Long, .. }));
        assert!(matches!(step.events[1], PositionEvent::Opened { side: Side::Short, .. }));
    }

    #[test]
    fn flip_with_rejected_open_ends_flat() {
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0(),
            base_bars: &history,
        };
        let step = apply(
            &long_at(105.0, "price < 100"),
            &decision(Action::OpenShort, None),
            &market,
            &RULES,
        );
        assert_eq!(step.position, Position::Flat);
        assert!(matches!(step.events[1], PositionEvent::OpenRejected { .. }));
    }

    #[test]
    fn min_hold_downgrades_close_but_not_forced_exit() {
        let rules = PositionRules {
            min_hold_minutes: 60,
            ..RULES
        };
        let history = bars(110.0);
        let market = MarketContext {
            price: 110.0,
            time: t0() + Duration::minutes(15),
            base_bars: &history,
        };
        let position = long_at(105.0, "price < 100");

        let step = apply(&position, &decision(Action::Close, None), &market, &rules);
        assert_eq!(step.position, position);
        assert_eq!(
            step.events,
            vec![PositionEvent::HoldEnforced { held_minutes: 15 }]
        );

        let later = MarketContext {
            time: t0() + Duration::minutes(61),
            ..market
        };
        let step = apply(&position, &decision(Action::Close, None), &later, &rules);
        assert_eq!(step.position, Position::Flat);

        let crash_bars = bars(90.0);
        let crash = MarketContext {
            price: 90.0,
            time: t0() + Duration::minutes(15),
            base_bars: &crash_bars,
        };
        let step = apply(&position, &decision(Action::Hold, None), &crash, &rules);
        assert!(matches!(step.events[0], PositionEvent::ForcedExit { .. }));
    }

    #[test]
    fn levels_on_wrong_side_are_dropped() {
        let history = bars(100.0);
        let market = MarketContext {
            price: 100.0,
            time: t0(),
            base_bars: &history,
        };
        let d = Decision {
            stop_loss: Some(101.0),
            profit_target: Some(110.0),
            ..decision(Action::OpenLong, Some("price < 95"))
        };
        let step = apply(&Position::Flat, &d, &market, &RULES);
        let open = step.position.as_open().unwrap();
        assert_eq!(open.stop_loss, None);
        assert_eq!(open.profit_target, Some(110.0));
    }
}
