//! Node runtime for the replicated Chord key-value store.
//!
//! This crate ties the core pieces together into a running node:
//! - Request dispatch with forwarding to the responsible node
//! - Sloppy-quorum fallback and hinted handoff when a primary is down
//! - The membership protocol: founder/joiner lifecycle, full-ring
//!   broadcast, key transfer
//! - Periodic stabilization (successor, fingers, predecessor liveness,
//!   successor list)
//! - Hinted-handoff recovery on rejoin

pub mod config;
pub mod error;
pub mod handlers;
pub mod membership;
pub mod node;
pub mod ops;
pub mod recovery;
pub mod stabilize;
pub mod state;

pub use config::NodeConfig;
pub use error::{Result, RuntimeError};
pub use node::Node;
pub use state::NodeState;
