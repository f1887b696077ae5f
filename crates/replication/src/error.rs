//! Error types for replication and quorum coordination.

/// Failures surfaced by quorum operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// R or W outside `[1, N]`. Rejected at start-up.
    #[error("invalid quorum configuration: {0}")]
    InvalidQuorum(String),

    /// Fewer acknowledgments than the threshold could be gathered. The
    /// operation failed but nothing is rolled back; partial writes converge
    /// later via read-repair or recovery.
    #[error("{op} quorum not met: needed {needed} acknowledgments, got {got}")]
    QuorumShortfall {
        op: &'static str,
        needed: usize,
        got: usize,
    },
}
