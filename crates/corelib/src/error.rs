//! Error types for the core library.

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Identifier-space parameter out of range.
    #[error("invalid identifier space: {0}")]
    InvalidSpace(String),

    /// Storage directory could not be prepared or read.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk record failed to parse.
    #[error("storage record: {0}")]
    Record(#[from] serde_json::Error),
}
