use std::time::Duration;
use thiserror::Error;

/// Failure reported by one evaluation of a condition.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// Not-found-yet, version conflict, transient network failure.
    #[error("{0:#}")]
    Retryable(anyhow::Error),
    /// Malformed input or a programming error. Stops the poll.
    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl ConditionError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        ConditionError::Retryable(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        ConditionError::Fatal(err.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConditionError::Fatal(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            ConditionError::Retryable(e) | ConditionError::Fatal(e) => e,
        }
    }
}

/// Outcome of one evaluation: `Ok(true)` when the awaited state is reached.
pub type ConditionResult = Result<bool, ConditionError>;

fn last_error_suffix(last: &Option<anyhow::Error>) -> String {
    match last {
        Some(e) => format!(": last error: {:#}", e),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid poll spec: {0}")]
    InvalidSpec(String),

    #[error(
        "timed out after {elapsed:?} ({attempts} attempts) waiting for {condition}{}",
        last_error_suffix(.last_error)
    )]
    Timeout {
        condition: String,
        elapsed: Duration,
        attempts: u32,
        last_error: Option<anyhow::Error>,
    },

    #[error("{condition}: {source:#}")]
    Fatal {
        condition: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("condition '{condition}' panicked: {message}")]
    Panicked { condition: String, message: String },
}

impl PollError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }

    /// The last retryable error observed before a timeout.
    pub fn last_error(&self) -> Option<&anyhow::Error> {
        match self {
            PollError::Timeout { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }
}
