//! Error vocabulary surfaced at the transactional core's boundary.
//!
//! Three kinds live here, matching how callers are expected to react:
//! transient errors a retry loop can absorb, terminal errors that force a
//! transaction to roll back, and fatal errors that indicate corruption.

use thiserror::Error as ThisError;

/// Result type alias used throughout the transactional core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transactional core.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A transient conflict that the caller may retry (e.g. a concurrent
    /// writer on the same singleton record).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A generated or requested id collided with an existing one. Like
    /// `Conflict`, this is transient and safe to retry.
    #[error("non-unique id: {0}")]
    NonUniqueId(String),

    /// An id or id range could not be reserved, e.g. because it would
    /// exceed the counter ceiling. Terminal: the transaction must roll back.
    #[error("id unavailable: {0}")]
    IdUnavailable(String),

    /// A caller passed an argument that violates a precondition. Terminal.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An invariant was violated in a way that indicates corrupted state.
    /// Fatal: the subsystem that raised it should abort rather than continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether this error is transient and may be retried by the caller.
    ///
    /// Only the id-range allocator retries internally; everywhere else this
    /// is surfaced to the transaction driver, which decides.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::NonUniqueId(_))
    }

    /// Whether this error indicates corrupted state that must abort the
    /// subsystem rather than merely roll back the current transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}
