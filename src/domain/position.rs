//! Position tracking.
//!
//! `Flat` carries no entry data at all, so a flat position can never hold a
//! stale entry price or invalidation condition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::AgentError;
use crate::domain::invalidation::InvalidationCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Flat,
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionSide::Flat => "FLAT",
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        };
        f.write_str(s)
    }
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => PositionSide::Long,
            Side::Short => PositionSide::Short,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub invalidation: InvalidationCondition,
    pub stop_loss: Option<f64>,
    pub profit_target: Option<f64>,
}

impl OpenPosition {
    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    /// Unrealised return in percent at `price`, signed for the side.
    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        let change = (price - self.entry_price) / self.entry_price * 100.0;
        if self.is_long() { change } else { -change }
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        match self.stop_loss {
            None => false,
            Some(level) if self.is_long() => price <= level,
            Some(level) => price >= level,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        match self.profit_target {
            None => false,
            Some(level) if self.is_long() => price >= level,
            Some(level) => price <= level,
        }
    }

    pub fn held_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entry_time).num_minutes()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Position {
    #[default]
    Flat,
    Open(OpenPosition),
}

impl Position {
    pub fn side(&self) -> PositionSide {
        match self {
            Position::Flat => PositionSide::Flat,
            Position::Open(open) => open.side.into(),
        }
    }

    pub fn as_open(&self) -> Option<&OpenPosition> {
        match self {
            Position::Flat => None,
            Position::Open(open) => Some(open),
        }
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        match self {
            Position::Flat => PositionSnapshot::flat(),
            Position::Open(open) => PositionSnapshot {
                side: open.side.into(),
                entry_price: Some(open.entry_price),
                entry_time: Some(open.entry_time),
                invalidation: Some(open.invalidation.text.clone()),
                stop_loss: open.stop_loss,
                profit_target: open.profit_target,
            },
        }
    }

    /// Rebuild a position from a stored snapshot. The invalidation text is
    /// re-parsed, so a snapshot written by this crate always restores.
    pub fn from_snapshot(
        snapshot: &PositionSnapshot,
        macd: (usize, usize, usize),
    ) -> Result<Position, AgentError> {
        let side = match snapshot.side {
            PositionSide::Flat => return Ok(Position::Flat),
            PositionSide::Long => Side::Long,
            PositionSide::Short => Side::Short,
        };

        let missing = |field: &str| AgentError::DatabaseQuery {
            reason: format!("{} position snapshot has no {}", snapshot.side, field),
        };
        let entry_price = snapshot.entry_price.ok_or_else(|| missing("entry_price"))?;
        let entry_time = snapshot.entry_time.ok_or_else(|| missing("entry_time"))?;
        let text = snapshot
            .invalidation
            .as_deref()
            .ok_or_else(|| missing("invalidation"))?;

        Ok(Position::Open(OpenPosition {
            side,
            entry_price,
            entry_time,
            invalidation: InvalidationCondition::parse(text, macd)?,
            stop_loss: snapshot.stop_loss,
            profit_target: snapshot.profit_target,
        }))
    }
}

/// Serialisable view of a position as stored with each record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub side: PositionSide,
    pub entry_price: Option<f64>,
    pub entry_time: Option<DateTime<Utc>>,
    pub invalidation: Option<String>,
    pub stop_loss: Option<f64>,
    pub profit_target: Option<f64>,
}

impl PositionSnapshot {
    pub fn flat() -> Self {
        Self {
            side: PositionSide::Flat,
            entry_price: None,
            entry_time: None,
            invalidation: None,
            stop_loss: None,
            profit_target: None,
        }
    }
}
