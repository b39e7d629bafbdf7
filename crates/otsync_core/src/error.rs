//! Error types for the OT engine.

use thiserror::Error;

/// Result type for OT operations.
pub type OtResult<T> = Result<T, OtError>;

/// Errors that can occur while loading, merging or pushing commits.
///
/// Conflicts detected by an OT system are not errors: they are resolved
/// in a canonical direction and carried by the resulting diffs. Only the
/// absence of a valid transform or path is reported here.
///
/// The type is `Clone` so that the result of one coalesced push can be
/// handed to every caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtError {
    /// The stated parent of a pushed commit is no longer a head.
    #[error("push conflict: parents of commit {commit} are no longer heads")]
    PushConflict {
        /// The rejected commit.
        commit: String,
    },

    /// No path between two commits where one was required.
    #[error("diverged history: no path from {from} to {to}")]
    DivergedHistory {
        /// The expected ancestor.
        from: String,
        /// The descendant the walk started from.
        to: String,
    },

    /// The repository does not know the commit.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// A backward walk ran out of commits before reaching its goal.
    #[error("incomplete graph: {0}")]
    IncompleteGraph(String),

    /// The repository has no heads.
    #[error("repository has no heads")]
    NoHeads,

    /// The OT system has no transform rule for a pair of diffs.
    #[error("transform error: {0}")]
    Transform(String),

    /// A structurally invalid commit was handed to a repository.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Diff bytes could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transient repository failure.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Operation not allowed in the current phase.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current phase.
        from: String,
        /// Attempted operation.
        to: String,
    },

    /// The operation was aborted because its owner was closed.
    #[error("operation cancelled")]
    Cancelled,
}

impl OtError {
    /// Creates a push conflict for the given commit.
    pub fn push_conflict(commit: impl std::fmt::Debug) -> Self {
        Self::PushConflict {
            commit: format!("{commit:?}"),
        }
    }

    /// Creates a diverged history error.
    pub fn diverged(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::DivergedHistory {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    /// Creates a commit not found error.
    pub fn not_found(commit: impl std::fmt::Debug) -> Self {
        Self::CommitNotFound(format!("{commit:?}"))
    }

    /// Returns true if the push loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OtError::PushConflict { .. } | OtError::RepositoryUnavailable(_)
        )
    }

    /// Returns true if this is a push conflict.
    pub fn is_push_conflict(&self) -> bool {
        matches!(self, OtError::PushConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(OtError::push_conflict(7u64).is_retryable());
        assert!(OtError::RepositoryUnavailable("connection reset".into()).is_retryable());
        assert!(!OtError::diverged(1u64, 2u64).is_retryable());
        assert!(!OtError::Codec("truncated".into()).is_retryable());
        assert!(!OtError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = OtError::diverged(3u64, 9u64);
        assert_eq!(err.to_string(), "diverged history: no path from 3 to 9");

        let err = OtError::not_found(42u64);
        assert!(err.to_string().contains("42"));
    }
}
