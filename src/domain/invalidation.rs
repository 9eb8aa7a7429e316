//! Invalidation condition AST.
//!
//! An open position carries the condition under which its thesis is void,
//! e.g. `price < 100` or `RSI14 > 80 and price above EMA20`. The text is kept
//! verbatim for prompts and records; the parsed `Rule` is what the state
//! machine evaluates each cycle.

use std::fmt;

use crate::domain::error::ParseError;
use crate::domain::indicator::{IndicatorField, IndicatorType};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Price,
    Constant(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Above { left: Operand, right: Operand },
    Below { left: Operand, right: Operand },
    AtOrAbove { left: Operand, right: Operand },
    AtOrBelow { left: Operand, right: Operand },
    And(Vec<Rule>),
    Or(Vec<Rule>),
}

impl Rule {
    /// Every indicator the rule reads, deduplicated, in first-seen order.
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        let mut out = Vec::new();
        self.collect_indicators(&mut out);
        out
    }

    fn collect_indicators(&self, out: &mut Vec<IndicatorType>) {
        match self {
            Rule::Above { left, right }
            | Rule::Below { left, right }
            | Rule::AtOrAbove { left, right }
            | Rule::AtOrBelow { left, right } => {
                for operand in [left, right] {
                    if let Operand::Indicator(r) = operand {
                        if !out.contains(&r.indicator_type) {
                            out.push(r.indicator_type);
                        }
                    }
                }
            }
            Rule::And(rules) | Rule::Or(rules) => {
                for rule in rules {
                    rule.collect_indicators(out);
                }
            }
        }
    }
}

/// A parsed condition together with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationCondition {
    pub text: String,
    pub rule: Rule,
}

impl InvalidationCondition {
    /// Parse `text`; MACD operands without parameters use `macd`.
    pub fn parse(text: &str, macd: (usize, usize, usize)) -> Result<Self, ParseError> {
        let rule = crate::domain::invalidation_parser::parse(text, macd)?;
        Ok(Self {
            text: text.trim().to_string(),
            rule,
        })
    }
}

impl fmt::Display for InvalidationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
