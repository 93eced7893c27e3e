//! Forwarder error types.

use thiserror::Error;

/// Result type for forwarder operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Errors that can abort a forwarding run. None of them is retried.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Standard input was empty, unreadable or not a watch payload.
    #[error("invalid input: {0}")]
    Input(String),

    /// The value was not valid base64 (or not UTF-8 once decoded).
    #[error("cannot decode value: {0}")]
    Decode(String),

    #[error("secret lookup for {key} failed: {reason}")]
    SecretLookup { key: String, reason: String },

    /// Broker unreachable, credentials rejected or connect timed out.
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("exchange {exchange} exists with incompatible parameters: {reason}")]
    ExchangeConflict { exchange: String, reason: String },

    #[error("publish was not confirmed by the broker: {0}")]
    PublishNotConfirmed(String),

    /// Any other broker failure once the connection is up.
    #[error("broker channel error: {0}")]
    Channel(String),
}

impl ForwardError {
    /// Process exit code reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ForwardError::Config(_) => 2,
            ForwardError::Input(_) => 3,
            ForwardError::Decode(_) => 4,
            ForwardError::SecretLookup { .. } => 5,
            ForwardError::Connection(_) => 6,
            ForwardError::ExchangeConflict { .. } => 7,
            ForwardError::PublishNotConfirmed(_) => 8,
            ForwardError::Channel(_) => 9,
        }
    }

    /// Returns true if the failure happened before any broker activity.
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            ForwardError::Config(_)
                | ForwardError::Input(_)
                | ForwardError::Decode(_)
                | ForwardError::SecretLookup { .. }
        )
    }
}

impl From<kvwatch_types::Error> for ForwardError {
    fn from(err: kvwatch_types::Error) -> Self {
        match err {
            kvwatch_types::Error::Input(msg) => ForwardError::Input(msg),
            kvwatch_types::Error::Decode(msg) => ForwardError::Decode(msg),
            kvwatch_types::Error::Serialization(e) => ForwardError::Input(e.to_string()),
        }
    }
}
