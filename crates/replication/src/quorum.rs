//! Quorum coordination.
//!
//! Threshold accounting follows the local-counts-as-one rule: the
//! coordinator is itself a replica, so a successful local write (or read)
//! contributes one acknowledgment and the fan-out only has to produce the
//! remaining `W-1` (or `R-1`).
//!
//! # Read resolution
//!
//! Among all returned versions the coordinator computes the maximal set:
//! versions not strictly dominated by another. A singleton wins outright
//! and every strictly older replica is queued for read-repair. Several
//! distinct maximal versions mean concurrent writes: the first received is
//! selected deterministically and the conflict is logged, never surfaced as
//! an error. Reads fail only on insufficient responses.

use tracing::{debug, warn};

use corelib::{Id, NodeRef, Value, VectorClock, VersionedValue};

use crate::consistency::QuorumConfig;
use crate::error::ReplicationError;
use crate::replicator::Replicator;

/// Result of resolving a set of quorum reads.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub winner: VersionedValue,
    /// Replicas whose version was strictly dominated by the winner.
    pub stale: Vec<NodeRef>,
    /// True when several distinct maximal versions were observed.
    pub conflict: bool,
}

/// Pick the winning version among the local read and the replica reads.
///
/// Ordering is "as received": the local copy first, then replicas in
/// fan-out order, which makes the conflict pick deterministic.
pub fn resolve_reads(
    local: Option<&VersionedValue>,
    reads: &[(NodeRef, Value, VectorClock)],
) -> Option<ReadOutcome> {
    let mut versions: Vec<&VectorClock> = Vec::with_capacity(reads.len() + 1);
    if let Some(entry) = local {
        versions.push(&entry.version);
    }
    versions.extend(reads.iter().map(|(_, _, version)| version));
    if versions.is_empty() {
        return None;
    }

    let is_maximal =
        |v: &VectorClock| !versions.iter().any(|other| v.happens_before(other));
    let winner_version = versions.iter().copied().find(|v| is_maximal(v))?;
    let conflict = versions
        .iter()
        .any(|v| is_maximal(v) && *v != winner_version);

    let winner = if local.is_some_and(|entry| entry.version == *winner_version) {
        local.cloned()
    } else {
        reads
            .iter()
            .find(|(_, _, version)| version == winner_version)
            .map(|(_, value, version)| VersionedValue::new(value.clone(), version.clone()))
    }?;

    let stale = reads
        .iter()
        .filter(|(_, _, version)| version.happens_before(&winner.version))
        .map(|(node, _, _)| node.clone())
        .collect();

    Some(ReadOutcome {
        winner,
        stale,
        conflict,
    })
}

/// Coordinates quorum writes and reads for one node.
pub struct QuorumCoordinator {
    local: NodeRef,
    config: QuorumConfig,
    replicator: Replicator,
    read_repair: bool,
}

impl QuorumCoordinator {
    pub fn new(local: NodeRef, config: QuorumConfig) -> Self {
        let replicator = Replicator::new(local.clone());
        Self {
            local,
            config,
            replicator,
            read_repair: true,
        }
    }

    pub fn without_read_repair(mut self) -> Self {
        self.read_repair = false;
        self
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    /// Fan out a write whose local copy is already stored. Succeeds when at
    /// least `W-1` replicas acknowledge on top of the local one; with `W=1`
    /// the fan-out still runs for redundancy but cannot fail the write.
    pub async fn write_remote(
        &self,
        key: &str,
        value: &Value,
        version: &VectorClock,
        replicas: &[NodeRef],
        primary: Id,
    ) -> Result<usize, ReplicationError> {
        let needed_remote = self.config.w().saturating_sub(1);
        let acknowledged = self
            .replicator
            .replicate_put(key, value, version, replicas, primary)
            .await;
        debug!(
            node = %self.local.id,
            key,
            acks = acknowledged.len() + 1,
            needed = self.config.w(),
            "quorum write"
        );
        if acknowledged.len() < needed_remote {
            return Err(ReplicationError::QuorumShortfall {
                op: "write",
                needed: self.config.w(),
                got: acknowledged.len() + 1,
            });
        }
        Ok(acknowledged.len())
    }

    /// Quorum read. `local` is this node's own copy (primary or hinted
    /// backup), counting as one response when present. Returns the winning
    /// versioned value and schedules read-repair for strictly older
    /// replicas.
    pub async fn read(
        &self,
        key: &str,
        replicas: &[NodeRef],
        primary_hint: Option<Id>,
        local: Option<VersionedValue>,
    ) -> Result<VersionedValue, ReplicationError> {
        let reads = self
            .replicator
            .replicate_get(key, replicas, primary_hint)
            .await;
        let responses = reads.len() + usize::from(local.is_some());
        if responses < self.config.r() {
            return Err(ReplicationError::QuorumShortfall {
                op: "read",
                needed: self.config.r(),
                got: responses,
            });
        }

        let outcome = resolve_reads(local.as_ref(), &reads).ok_or(
            // R >= 1 guarantees at least one response here; unreachable in
            // practice but kept as a shortfall rather than a panic.
            ReplicationError::QuorumShortfall {
                op: "read",
                needed: self.config.r(),
                got: 0,
            },
        )?;

        if outcome.conflict {
            warn!(
                node = %self.local.id,
                key,
                version = %outcome.winner.version,
                "concurrent versions observed; picked first received"
            );
        }
        if self.read_repair && !outcome.stale.is_empty() {
            self.replicator.spawn_repair(
                key.to_owned(),
                outcome.winner.value.clone(),
                outcome.winner.version.clone(),
                outcome.stale.clone(),
                primary_hint.unwrap_or(self.local.id),
            );
        }
        Ok(outcome.winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeRef {
        NodeRef::new(Id(id), format!("host{id}:1"))
    }

    fn clock(entries: &[(u64, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().copied())
    }

    fn read(id: u64, value: &str, version: VectorClock) -> (NodeRef, Value, VectorClock) {
        (node(id), Value::from(value), version)
    }

    #[test]
    fn test_resolve_single_read() {
        let reads = vec![read(2, "v", clock(&[(1, 1)]))];
        let outcome = resolve_reads(None, &reads).unwrap();
        assert_eq!(outcome.winner.value, Value::from("v"));
        assert!(outcome.stale.is_empty());
        assert!(!outcome.conflict);
    }

    #[test]
    fn test_resolve_marks_stale_replicas() {
        let old = clock(&[(1, 1)]);
        let new = clock(&[(1, 2)]);
        let local = VersionedValue::new("new", new.clone());
        let reads = vec![read(2, "old", old), read(3, "new", new)];
        let outcome = resolve_reads(Some(&local), &reads).unwrap();
        assert_eq!(outcome.winner.value, Value::from("new"));
        assert_eq!(outcome.stale.len(), 1);
        assert_eq!(outcome.stale[0].id, Id(2));
        assert!(!outcome.conflict);
    }

    #[test]
    fn test_resolve_conflict_picks_first_received() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(2, 1)]);
        let reads = vec![read(2, "x", a), read(3, "y", b)];
        let outcome = resolve_reads(None, &reads).unwrap();
        assert!(outcome.conflict);
        assert_eq!(outcome.winner.value, Value::from("x"));
        // Concurrent versions are not repaired over.
        assert!(outcome.stale.is_empty());
    }

    #[test]
    fn test_resolve_dominated_first_read_does_not_win() {
        let old = clock(&[(1, 1)]);
        let a = clock(&[(1, 2)]);
        let b = clock(&[(1, 1), (2, 1)]);
        let reads = vec![read(2, "old", old), read(3, "a", a), read(4, "b", b)];
        let outcome = resolve_reads(None, &reads).unwrap();
        // The winner is the first *maximal* version, not the first response.
        assert!(outcome.conflict);
        assert_eq!(outcome.winner.value, Value::from("a"));
        assert_eq!(outcome.stale.len(), 1);
        assert_eq!(outcome.stale[0].id, Id(2));
    }

    #[test]
    fn test_local_copy_wins_ties() {
        let version = clock(&[(1, 1)]);
        let local = VersionedValue::new("local", version.clone());
        let reads = vec![read(2, "remote", version)];
        let outcome = resolve_reads(Some(&local), &reads).unwrap();
        assert_eq!(outcome.winner.value, Value::from("local"));
        assert!(outcome.stale.is_empty());
    }
}
