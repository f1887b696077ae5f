//! Error types for the node runtime.

/// Result type alias for the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failures surfaced by the node runtime. Remote callers never see these
/// directly: the dispatcher converts a failing handler into an ERROR
/// reply.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] corelib::Error),

    #[error(transparent)]
    Wire(#[from] wire::WireError),

    #[error(transparent)]
    Quorum(#[from] replication::ReplicationError),
}
