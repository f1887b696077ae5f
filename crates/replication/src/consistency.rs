//! Tunable consistency: the N/R/W knobs.
//!
//! With N replicas per key, a write needs W acknowledgments and a read
//! needs R responses. Their sum against N classifies the guarantee:
//!
//! - **R + W > N**: strong, every read quorum overlaps every write quorum
//! - **R + W = N**: moderate, overlap is possible but not guaranteed
//! - **R + W < N**: eventual, reads may miss the latest write entirely

use std::fmt;

use crate::error::ReplicationError;

/// Consistency guarantee implied by a quorum configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    Strong,
    Moderate,
    Eventual,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyLevel::Strong => write!(f, "STRONG (R+W > N)"),
            ConsistencyLevel::Moderate => write!(f, "MODERATE (R+W = N)"),
            ConsistencyLevel::Eventual => write!(f, "EVENTUAL (R+W < N)"),
        }
    }
}

/// Validated replication parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumConfig {
    n: usize,
    r: usize,
    w: usize,
}

impl QuorumConfig {
    /// Validate `1 <= R <= N` and `1 <= W <= N`. A configuration outside these
    /// bounds is a start-up error, never a runtime surprise.
    pub fn new(n: usize, r: usize, w: usize) -> Result<Self, ReplicationError> {
        if n == 0 {
            return Err(ReplicationError::InvalidQuorum(
                "replication factor N must be at least 1".into(),
            ));
        }
        if r < 1 || r > n {
            return Err(ReplicationError::InvalidQuorum(format!(
                "read quorum R={r} must satisfy 1 <= R <= N={n}"
            )));
        }
        if w < 1 || w > n {
            return Err(ReplicationError::InvalidQuorum(format!(
                "write quorum W={w} must satisfy 1 <= W <= N={n}"
            )));
        }
        Ok(Self { n, r, w })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn r(&self) -> usize {
        self.r
    }

    pub fn w(&self) -> usize {
        self.w
    }

    pub fn level(&self) -> ConsistencyLevel {
        match (self.r + self.w).cmp(&self.n) {
            std::cmp::Ordering::Greater => ConsistencyLevel::Strong,
            std::cmp::Ordering::Equal => ConsistencyLevel::Moderate,
            std::cmp::Ordering::Less => ConsistencyLevel::Eventual,
        }
    }
}
