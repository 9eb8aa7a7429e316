//! Run statistics carried from cycle to cycle.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    /// Completed cycles only; aborted cycles leave this unchanged.
    pub invocations: u64,
}

impl RunStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            invocations: 0,
        }
    }

    /// Whole minutes since start, never negative.
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_minutes().max(0)
    }

    /// The invocation number the current cycle will carry if it completes.
    pub fn next_invocation(&self) -> u64 {
        self.invocations + 1
    }

    pub fn record_completed(&mut self) {
        self.invocations += 1;
    }
}
