//! Conversation records: the persisted trace of one completed cycle.

use chrono::{DateTime, Utc};

use crate::domain::decision::Decision;
use crate::domain::position::PositionSnapshot;

/// A record before the store has assigned its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversationRecord {
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub user_prompt: String,
    pub reasoning: Option<String>,
    pub summary: String,
    pub decision: Decision,
    pub position: PositionSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub user_prompt: String,
    pub reasoning: Option<String>,
    pub summary: String,
    pub decision: Decision,
    pub position: PositionSnapshot,
}

impl NewConversationRecord {
    pub fn with_sequence(self, sequence: u64) -> ConversationRecord {
        ConversationRecord {
            sequence,
            timestamp: self.timestamp,
            instrument: self.instrument,
            user_prompt: self.user_prompt,
            reasoning: self.reasoning,
            summary: self.summary,
            decision: self.decision,
            position: self.position,
        }
    }
}
