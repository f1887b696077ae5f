//! Error types for the wire protocol.

use crate::message::MessageType;

/// Result type alias for the wire crate.
pub type Result<T> = std::result::Result<T, WireError>;

/// Transport and protocol failures.
///
/// Every variant except [`WireError::Remote`] is a local/transport error
/// and is treated by callers as "target unresponsive", never fatal to the
/// node.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("connection closed mid-frame")]
    ConnectionClosed,

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reply correlation mismatch: sent {sent}, got {got}")]
    Correlation { sent: String, got: String },

    #[error("unexpected reply type {0}")]
    UnexpectedReply(MessageType),

    #[error("remote error: {0}")]
    Remote(String),
}

impl WireError {
    /// True when the failure means the peer did not usefully respond
    /// (connection refused, timeout, truncated frame). Routing and
    /// replication treat these as a missing acknowledgment.
    pub fn is_unresponsive(&self) -> bool {
        matches!(
            self,
            WireError::Io(_)
                | WireError::Timeout(_)
                | WireError::ConnectionClosed
                | WireError::FrameTooLarge(_)
        )
    }
}
