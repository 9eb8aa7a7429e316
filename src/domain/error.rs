//! Domain error types.

/// A parse error with position information for invalidation conditions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for tradeloop.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    ConditionParse(#[from] ParseError),

    #[error("invalid price data for {instrument}: {reason}")]
    InvalidPriceData { instrument: String, reason: String },

    #[error("insufficient data for {instrument}: have {bars} bars, need {minimum}")]
    InsufficientData {
        instrument: String,
        bars: usize,
        minimum: usize,
    },

    #[error("price feed error: {reason}")]
    Feed { reason: String },

    #[error("model backend error: {reason}")]
    Backend { reason: String },

    #[error("model backend timed out after {seconds}s")]
    BackendTimeout { seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Malformed or missing price history. Fatal to the cycle.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidPriceData { .. }
                | AgentError::InsufficientData { .. }
                | AgentError::Feed { .. }
        )
    }

    /// Transport failure or timeout talking to the model. Retried next tick.
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            AgentError::Backend { .. } | AgentError::BackendTimeout { .. }
        )
    }
}

impl From<&AgentError> for std::process::ExitCode {
    fn from(err: &AgentError) -> Self {
        let code: u8 = match err {
            AgentError::Io(_) => 1,
            AgentError::ConfigParse { .. }
            | AgentError::ConfigMissing { .. }
            | AgentError::ConfigInvalid { .. } => 2,
            AgentError::Database { .. } | AgentError::DatabaseQuery { .. } => 3,
            AgentError::ConditionParse(_) => 4,
            AgentError::InvalidPriceData { .. }
            | AgentError::InsufficientData { .. }
            | AgentError::Feed { .. } => 5,
            AgentError::Backend { .. } | AgentError::BackendTimeout { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
