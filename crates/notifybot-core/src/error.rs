//! Error types for the notification bot
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for notification bot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the notification bot
#[derive(Error, Debug)]
pub enum Error {
    /// Version control errors (fetch, log, ref lookup)
    #[error("Repository error: {0}")]
    Vcs(String),

    /// Ledger storage errors other than write conflicts
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// A ledger write kept losing the compare-and-swap race
    #[error("Ledger conflict on {reference}: gave up after {attempts} attempts ({details})")]
    LedgerConflict {
        /// Reference the ledger lives on
        reference: String,
        /// Number of push attempts made
        attempts: usize,
        /// Rejection details reported by the last attempt
        details: String,
    },

    /// A change was too large to announce and was recorded silently
    #[error("Too many changes: {0}")]
    Excessive(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An idempotent notifier failed; the event will be offered again
    #[error("Notifier error ({notifier}): {message}")]
    Notifier {
        /// Notifier name
        notifier: String,
        /// Error message
        message: String,
    },

    /// A non-idempotent notifier failed; the event is already recorded and
    /// will not be offered again
    #[error("Non-retriable notifier error ({notifier}): {message}")]
    NonRetriable {
        /// Notifier name
        notifier: String,
        /// Error message
        message: String,
    },

    /// One or more errors were collected while running a poll cycle
    #[error("Poll cycle finished with {} error(s): {}", .errors.len(), summarize(.errors))]
    CycleFailed {
        /// Every error collected during the cycle, in detection order
        errors: Vec<Error>,
    },

    /// Filesystem and process errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid branch patterns
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn summarize(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a repository error
    pub fn vcs(msg: impl Into<String>) -> Self {
        Self::Vcs(msg.into())
    }

    /// Create a ledger error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create an error for a change that was skipped for its size
    pub fn excessive(msg: impl Into<String>) -> Self {
        Self::Excessive(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a retriable notifier error
    pub fn notifier(notifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notifier {
            notifier: notifier.into(),
            message: message.into(),
        }
    }

    /// Create a non-retriable notifier error
    pub fn non_retriable(notifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NonRetriable {
            notifier: notifier.into(),
            message: message.into(),
        }
    }

    /// Whether running the same cycle again may clear this error.
    ///
    /// A failed cycle is retriable only when every collected error is.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::NonRetriable { .. }
            | Self::Excessive(_)
            | Self::Config(_)
            | Self::InvalidInput(_)
            | Self::Pattern(_) => false,
            Self::CycleFailed { errors } => errors.iter().all(Error::is_retriable),
            _ => true,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
