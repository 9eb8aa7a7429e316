//! Conversation store port.

use crate::domain::error::AgentError;
use crate::domain::record::{ConversationRecord, NewConversationRecord};

pub trait ConversationPort {
    /// Persist one record atomically, assigning the next sequence number
    /// for its instrument.
    fn append(&self, record: NewConversationRecord) -> Result<ConversationRecord, AgentError>;

    /// The most recent `limit` records, ordered by sequence ascending.
    fn list(&self, instrument: &str, limit: usize) -> Result<Vec<ConversationRecord>, AgentError>;

    fn latest(&self, instrument: &str) -> Result<Option<ConversationRecord>, AgentError>;
}
