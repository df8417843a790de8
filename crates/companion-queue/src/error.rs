//! Error types for the job-queue domain.

use companion_core::JobId;

/// The result type used throughout companion-queue.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in queue operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler is registered for a job type on the emit path.
    #[error("no handler registered for job type: {job_type}")]
    UnknownJobType {
        /// The unregistered job type.
        job_type: String,
    },

    /// A logical ID failed validation.
    #[error("malformed logical ID: {message}")]
    MalformedLogicalId {
        /// Description of the problem.
        message: String,
    },

    /// A sort key could not be parsed.
    #[error("invalid sort key: {sort_key}")]
    InvalidSortKey {
        /// The offending sort key.
        sort_key: String,
    },

    /// A job record was not found.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was looked up.
        job_id: JobId,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from companion-core (storage, lock, IDs).
    #[error("core error: {0}")]
    Core(#[from] companion_core::Error),
}

impl Error {
    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
