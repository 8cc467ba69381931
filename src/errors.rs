//! # Errors
//! Every fallible operation in `promptline` returns [Error]. Senders report their own failures as
//! [anyhow::Error], which the chain and the conversation wrap into [Error::SenderFailure] without interpreting them.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range input from the caller, detected before any state change.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// Strict rendering found placeholders with no value and no default.
    /// `missing` is in first-appearance order of the template.
    #[error("MissingVariables: no value or default for {missing:?}")]
    MissingVariables { missing: Vec<String> },

    #[error("EmptyChain: the chain has no steps to run")]
    EmptyChain,

    /// Persisted template/chain/conversation data failed structural validation.
    #[error("MalformedData: {0}")]
    MalformedData(String),

    /// The sender failed after exhausting its own retry budget.
    #[error("SenderFailure{}: {source}", .step.as_ref().map(|s| format!(" at step '{}'", s)).unwrap_or_default())]
    SenderFailure {
        step: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation observed before a request was sent. A chain run reports how many of its steps finished;
    /// a conversation turn has no steps and reports `None`.
    #[error("Cancelled{}", .completed_steps.map(|n| format!(": run stopped after {} completed step(s)", n)).unwrap_or_default())]
    Cancelled { completed_steps: Option<usize> },

    /// The environment does not describe a usable client.
    #[error("Configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedData(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::MalformedData(error.to_string())
    }
}
