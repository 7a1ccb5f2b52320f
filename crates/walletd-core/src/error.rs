use std::fmt;

use crate::broadcast::ServiceFailure;
use crate::codec::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid transaction: {0}")]
    Validation(#[from] DecodeError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("insufficient funds: inputs {inputs} sat < outputs {outputs} sat")]
    InsufficientFunds { inputs: u64, outputs: u64 },

    #[error("{source_name} unavailable: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("all data sources failed: {}", SourceErrors(.errors))]
    AllSourcesFailed { errors: Vec<(String, String)> },

    #[error("broadcast failed on every service: {}", FailureList(.failures))]
    BroadcastFailed { failures: Vec<ServiceFailure> },

    #[error("cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn unavailable(source_name: &str, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.to_owned(),
            message: message.into(),
        }
    }
}

struct SourceErrors<'a>(&'a [(String, String)]);

impl fmt::Display for SourceErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no sources configured");
        }
        for (i, (name, message)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}: {message}")?;
        }
        Ok(())
    }
}

struct FailureList<'a>(&'a [ServiceFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no broadcast services configured");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
