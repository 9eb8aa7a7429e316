//! Language model backend port.

use crate::domain::error::AgentError;

/// One completed model reply. `reasoning` is the separate reasoning channel
/// some backends expose; it is `None` when absent or empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub reasoning: Option<String>,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>, reasoning: Option<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: reasoning.filter(|r| !r.trim().is_empty()),
        }
    }
}

pub trait ModelPort {
    /// Send `prompt` and wait for the reply. Transport failures, timeouts
    /// and non-success responses are `Backend`/`BackendTimeout` errors.
    fn complete(&self, prompt: &str) -> Result<ModelResponse, AgentError>;
}
