//! Turns a prompt into a decision via a `ModelPort`.

use tracing::warn;

use crate::domain::decision::{parse_decision, parse_error_summary, Decision};
use crate::domain::error::AgentError;
use crate::ports::model_port::ModelPort;

/// What one model call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub reasoning: Option<String>,
    pub summary: String,
    /// Set when the reply could not be read and HOLD was substituted.
    pub parse_error: Option<String>,
}

/// Backend failures propagate; an unreadable reply becomes HOLD with a
/// `[PARSE_ERROR]` summary that keeps the raw text.
pub fn decide(
    model: &dyn ModelPort,
    prompt: &str,
    instrument: &str,
) -> Result<DecisionOutcome, AgentError> {
    let response = model.complete(prompt)?;

    match parse_decision(&response.content, instrument) {
        Ok(decision) => Ok(DecisionOutcome {
            summary: decision.summary_line(),
            decision,
            reasoning: response.reasoning,
            parse_error: None,
        }),
        Err(reason) => {
            warn!(instrument, %reason, "model reply could not be parsed, holding");
            Ok(DecisionOutcome {
                decision: Decision::hold(),
                reasoning: response.reasoning,
                summary: parse_error_summary(&reason, &response.content),
                parse_error: Some(reason),
            })
        }
    }
}
