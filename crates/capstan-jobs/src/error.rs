//! Error types for the job engine.

use snafu::Snafu;

/// Result type for job operations.
pub type Result<T, E = JobError> = std::result::Result<T, E>;

/// Errors raised by job operations.
///
/// Every error aborts the surrounding transaction before any mutation, so a
/// failed operation leaves the store unchanged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// A required argument was absent or empty.
    #[snafu(display("missing required argument: {field}"))]
    MissingArgument {
        /// Name of the absent argument.
        field: String,
    },

    /// An argument was present but malformed.
    #[snafu(display("invalid argument: {reason}"))]
    InvalidArgument {
        /// Why the argument was rejected.
        reason: String,
    },

    /// No job hash exists for the jid.
    #[snafu(display("job not found: {jid}"))]
    JobNotFound {
        /// Jid that was not found.
        jid: String,
    },

    /// The job's current worker does not match the caller.
    #[snafu(display("job {jid} is not held by worker {worker}"))]
    OwnershipLost {
        /// Jid whose lock was lost.
        jid: String,
        /// Worker that issued the call.
        worker: String,
    },

    /// The operation requires a state the job is not in.
    #[snafu(display("invalid job state: {state} for operation: {operation}"))]
    InvalidJobState {
        /// Current job state.
        state: String,
        /// Operation that was attempted.
        operation: String,
    },

    /// The job cannot be destroyed while other jobs depend on it.
    #[snafu(display("job {jid} still has dependents"))]
    HasDependents {
        /// Jid with live dependents.
        jid: String,
    },

    /// A JSON field failed to encode or decode.
    #[snafu(display("serialization error: {source}"))]
    Serialization {
        /// Source error.
        source: serde_json::Error,
    },
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { source: err }
    }
}
