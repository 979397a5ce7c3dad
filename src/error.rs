//! Error types for the feedspeak pipeline.

/// Top-level error type for the feed-to-speech system.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration missing or invalid. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Feed connection error (connect, read, close).
    #[error("feed error: {0}")]
    Feed(String),

    /// Feed payload that could not be parsed.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Completion API error.
    #[error("completion error: {message}")]
    Completion {
        /// Human-readable cause (never contains the API key).
        message: String,
        /// Whether a retry may succeed (network, 429, 5xx).
        retryable: bool,
    },

    /// A remote call or subprocess exceeded its time budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Speech synthesis or playback subprocess failed.
    #[error("speech error: {0}")]
    Speech(String),

    /// The lock gate could not be acquired in time.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// No participant is configured under this id.
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Build a completion error that a retry may fix.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Completion {
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a completion error that retrying will not fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Completion {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error represents a transient failure that can be retried.
    ///
    /// Only completion failures flagged as transient and timeouts qualify.
    /// Configuration, speech and lock errors need an operator, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Completion { retryable, .. } => *retryable,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
