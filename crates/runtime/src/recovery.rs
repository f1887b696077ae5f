//! Hinted-handoff recovery.
//!
//! When a node returns after an outage, writes it missed live as hints in
//! the backup stores of its ring successors. Recovery pulls them back:
//!
//! 1. Ask each of the next `N-1` successors for the hint bucket filed
//!    under this node's id; the sender deletes the bucket once replied
//! 2. Keep the dominating version per key across the responses
//! 3. Reconcile into the primary store: accept when absent or strictly
//!    newer, join clocks on concurrency (value from the hint), keep the
//!    local entry otherwise
//! 4. Push the reconciled authoritative versions to the current `N-1`
//!    successors via UPDATE_BACKUP
//!
//! Version comparison is monotonic and the forward push installs versions
//! verbatim, so a second consecutive run is a fixed point: it pulls back
//! exactly the versions it pushed, keeps every local entry, and pushes the
//! same versions again.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use corelib::{NodeRef, VersionedValue};
use wire::message::{self as msg, MessageType};
use wire::Envelope;

use crate::node::Node;
use crate::state::NodeState;

/// Timeout for one RECOVER_HANDOFF exchange.
pub const RECOVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for one UPDATE_BACKUP push.
pub const UPDATE_BACKUP_TIMEOUT: Duration = Duration::from_secs(3);

impl Node {
    /// Pull hinted handoffs back from the ring. Returns the number of
    /// distinct keys recovered.
    pub async fn recover_hinted_handoffs(&self) -> usize {
        let n = self.config.n_replicas;
        let targets = self.recovery_targets(n);
        if targets.is_empty() {
            debug!(node = %self.id(), "no successors to recover from");
            return 0;
        }
        info!(node = %self.id(), targets = targets.len(), "checking for hinted handoffs");

        // Step 1 + 2: collect, keeping the dominating version per key.
        let mut recovered: HashMap<String, VersionedValue> = HashMap::new();
        for target in &targets {
            let Ok(request) = Envelope::request(
                MessageType::RecoverHandoff,
                self.local(),
                msg::RecoverHandoff {
                    requesting_node_id: self.id(),
                },
            ) else {
                continue;
            };
            match wire::call_checked(&target.address, &request, RECOVER_TIMEOUT).await {
                Ok(reply) => match reply.payload::<msg::KeyBundle>() {
                    Ok(bundle) => {
                        if !bundle.keys.is_empty() && self.state() == NodeState::Joined {
                            self.set_state(NodeState::Recovering);
                        }
                        debug!(node = %self.id(), from = %target, count = bundle.keys.len(), "hints received");
                        for (key, incoming) in bundle.keys {
                            match recovered.get(&key) {
                                Some(existing)
                                    if !existing.version.happens_before(&incoming.version) => {}
                                _ => {
                                    recovered.insert(key, incoming);
                                }
                            }
                        }
                    }
                    Err(err) => warn!(node = %self.id(), from = %target, %err, "bad handoff reply"),
                },
                Err(err) => {
                    warn!(node = %self.id(), from = %target, %err, "handoff recovery call failed");
                }
            }
        }
        if recovered.is_empty() {
            return 0;
        }
        let count = recovered.len();
        info!(node = %self.id(), count, "reconciling recovered keys");

        // Step 3: reconcile into the primary store.
        let mut reconciled: Vec<(String, VersionedValue)> = Vec::with_capacity(count);
        for (key, incoming) in recovered {
            let stored = self.reconcile_recovered(&key, incoming);
            reconciled.push((key, stored));
        }

        // Step 4: replicate the authoritative versions forward to the
        // current N-1 ring successors.
        self.update_successor_list().await;
        let replicas = self.recovery_targets(n);
        for replica in &replicas {
            for (key, entry) in &reconciled {
                let Ok(request) = Envelope::request(
                    MessageType::UpdateBackup,
                    self.local(),
                    msg::ReplicaWrite {
                        key: key.clone(),
                        value: entry.value.clone(),
                        version: entry.version.clone(),
                        primary_node_id: self.id(),
                    },
                ) else {
                    continue;
                };
                if let Err(err) =
                    wire::call_checked(&replica.address, &request, UPDATE_BACKUP_TIMEOUT).await
                {
                    warn!(node = %self.id(), replica = %replica, key = %key, %err, "backup push failed");
                }
            }
        }

        if self.state() == NodeState::Recovering {
            self.set_state(NodeState::Joined);
        }
        count
    }

    /// Apply the recovery reconciliation rule for one key and return the
    /// version now stored.
    fn reconcile_recovered(&self, key: &str, incoming: VersionedValue) -> VersionedValue {
        match self.storage().get(key) {
            None => {
                debug!(node = %self.id(), key, version = %incoming.version, "restored (new)");
                self.storage()
                    .put(key, incoming.value.clone(), Some(incoming.version.clone()));
                incoming
            }
            Some(local) if local.version.happens_before(&incoming.version) => {
                debug!(node = %self.id(), key, version = %incoming.version, "restored (newer)");
                self.storage()
                    .put(key, incoming.value.clone(), Some(incoming.version.clone()));
                incoming
            }
            Some(local) if local.version.concurrent_with(&incoming.version) => {
                // We were down and missed updates: take the hint's value and
                // join the clocks so the result dominates both histories.
                let merged = local.version.merged(&incoming.version);
                debug!(node = %self.id(), key, version = %merged, "restored (concurrent, clocks joined)");
                self.storage()
                    .put(key, incoming.value.clone(), Some(merged.clone()));
                VersionedValue::new(incoming.value, merged)
            }
            Some(local) => {
                debug!(node = %self.id(), key, version = %local.version, "kept local (newer)");
                local
            }
        }
    }

    fn recovery_targets(&self, n: usize) -> Vec<NodeRef> {
        let ring = self.ring.read();
        let mut targets: Vec<NodeRef> = ring
            .n_successors(self.id(), n)
            .into_iter()
            .filter(|node| node.id != self.id())
            .take(n.saturating_sub(1))
            .collect();
        if targets.is_empty() {
            targets = ring
                .successor_list()
                .iter()
                .filter(|node| node.id != self.id())
                .take(n.saturating_sub(1))
                .cloned()
                .collect();
        }
        targets
    }
}
