//! Replication and quorum coordination.
//!
//! This crate drives the redundancy half of the store:
//! - Consistency-level classification from the N/R/W knobs
//! - Parallel replica fan-out (PUT_REPLICA / GET_REPLICA) with per-target
//!   error isolation
//! - The quorum coordinator: threshold accounting, conflict detection,
//!   read-repair of stale replicas

pub mod consistency;
pub mod error;
pub mod quorum;
pub mod replicator;

pub use consistency::{ConsistencyLevel, QuorumConfig};
pub use error::ReplicationError;
pub use quorum::{QuorumCoordinator, ReadOutcome};
pub use replicator::Replicator;
