//! Membership: founding a ring and joining one.
//!
//! The join protocol learns the full ring in one round-trip and announces
//! itself to every member, so replica selection works immediately:
//!
//! 1. Ask a known member for this node's successor
//! 2. Fetch the full membership list and install it
//! 3. Broadcast the join to every other member
//! 4. Pull the keys in `(predecessor, self]` from the replica-range
//!    successors
//! 5. Load persisted records
//! 6. Run hinted-handoff recovery
//!
//! Each step is best-effort: a failure leaves the simpler state in place
//! (the known member as successor) and periodic stabilization repairs the
//! rest.

use std::time::Duration;

use tracing::{info, warn};

use corelib::NodeRef;
use wire::message::{self as msg, MessageType};
use wire::Envelope;

use crate::error::Result;
use crate::node::Node;
use crate::state::NodeState;

/// Timeout for the heavyweight join steps (successor lookup, membership
/// fetch, key transfer).
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one BROADCAST_JOIN announcement.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra stabilization rounds run right after a join.
const POST_JOIN_ROUNDS: usize = 3;
const POST_JOIN_ROUND_DELAY: Duration = Duration::from_millis(500);

impl Node {
    /// Found a fresh ring: successor is self, no predecessor.
    pub async fn create_ring(&self) -> Result<()> {
        {
            let mut ring = self.ring.write();
            let local = ring.local().clone();
            ring.clear_predecessor();
            ring.set_successor(local.clone());
            ring.set_successor_list(vec![local.clone()]);
            ring.set_all_nodes(vec![local]);
        }
        let (primary, backups) = self.storage().load();
        if primary + backups > 0 {
            info!(node = %self.id(), primary, backups, "loaded persisted records");
        }
        self.set_state(NodeState::Standalone);
        info!(node = %self.id(), "created new ring");
        Ok(())
    }

    /// Join the ring that `known_address` belongs to.
    pub async fn join_ring(&self, known_address: &str) -> Result<()> {
        let known = NodeRef::new(
            self.space().hash_address(known_address),
            known_address.to_owned(),
        );
        info!(node = %self.id(), via = %known, "joining ring");
        self.ring.write().clear_predecessor();

        // Step 1: successor.
        let successor = self.locate_successor_via(&known).await;
        {
            let mut ring = self.ring.write();
            ring.set_successor(successor.clone());
            ring.set_successor_list(vec![successor.clone()]);
        }
        info!(node = %self.id(), successor = %successor, "successor found");

        // Step 2: full membership.
        match self.fetch_all_nodes(&known).await {
            Ok(mut nodes) => {
                nodes.push(self.local().clone());
                let count = nodes.len();
                self.ring.write().set_all_nodes(nodes);
                info!(node = %self.id(), count, "full ring knowledge installed");
            }
            Err(err) => {
                warn!(node = %self.id(), %err, "could not fetch membership, stabilization will repair");
            }
        }

        // Step 3: announce ourselves to everyone.
        self.broadcast_join().await;

        // Step 4: take over our key range.
        self.transfer_keys_from_successors().await;

        // Step 5: persisted records.
        let (primary, backups) = self.storage().load();
        if primary + backups > 0 {
            info!(node = %self.id(), primary, backups, "loaded persisted records");
        }

        self.set_state(NodeState::Joined);

        // Settle pointers before pulling hints back in.
        self.stabilize().await;
        self.update_successor_list().await;
        for _ in 0..POST_JOIN_ROUNDS {
            tokio::time::sleep(POST_JOIN_ROUND_DELAY).await;
            self.stabilize().await;
            self.update_successor_list().await;
        }

        // Step 6: hinted-handoff recovery.
        let recovered = self.recover_hinted_handoffs().await;
        if recovered > 0 {
            info!(node = %self.id(), recovered, "hinted-handoff recovery complete");
        }
        Ok(())
    }

    async fn locate_successor_via(&self, known: &NodeRef) -> NodeRef {
        let request = match Envelope::request(
            MessageType::FindSuccessor,
            self.local(),
            msg::FindSuccessor {
                identifier: self.id(),
            },
        ) {
            Ok(request) => request,
            Err(_) => return known.clone(),
        };
        match wire::call_checked(&known.address, &request, JOIN_TIMEOUT).await {
            Ok(reply) => reply
                .payload::<msg::FindSuccessorReply>()
                .ok()
                .and_then(|r| r.successor)
                .unwrap_or_else(|| known.clone()),
            Err(err) => {
                warn!(node = %self.id(), %err, "successor lookup failed, falling back to known member");
                known.clone()
            }
        }
    }

    async fn fetch_all_nodes(&self, known: &NodeRef) -> Result<Vec<NodeRef>> {
        let request = Envelope::request(
            MessageType::GetAllNodes,
            self.local(),
            msg::Empty::default(),
        )?;
        let reply = wire::call_checked(&known.address, &request, JOIN_TIMEOUT).await?;
        Ok(reply.payload::<msg::NodesReply>()?.nodes)
    }

    async fn broadcast_join(&self) {
        let peers: Vec<NodeRef> = {
            self.ring
                .read()
                .all_nodes()
                .iter()
                .filter(|n| n.id != self.id())
                .cloned()
                .collect()
        };
        let mut acked = 0usize;
        for peer in &peers {
            let Ok(request) = Envelope::request(
                MessageType::BroadcastJoin,
                self.local(),
                msg::NodeAnnounce::from(self.local()),
            ) else {
                continue;
            };
            match wire::call_checked(&peer.address, &request, BROADCAST_TIMEOUT).await {
                Ok(_) => acked += 1,
                Err(err) => warn!(node = %self.id(), peer = %peer, %err, "join broadcast failed"),
            }
        }
        info!(node = %self.id(), acked, peers = peers.len(), "join broadcast");
    }

    async fn transfer_keys_from_successors(&self) {
        let n = self.config.n_replicas;
        let (successors, predecessor_id) = {
            let ring = self.ring.read();
            let successors: Vec<NodeRef> = ring
                .n_successors(self.id(), n)
                .into_iter()
                .filter(|node| node.id != self.id())
                .collect();
            (successors, ring.predecessor().map(|p| p.id))
        };
        for donor in &successors {
            let Ok(request) = Envelope::request(
                MessageType::TransferKeysRequest,
                self.local(),
                msg::TransferKeysRequest {
                    new_node_id: self.id(),
                    predecessor_id,
                },
            ) else {
                continue;
            };
            match wire::call_checked(&donor.address, &request, JOIN_TIMEOUT).await {
                Ok(reply) => match reply.payload::<msg::KeyBundle>() {
                    Ok(bundle) => {
                        let received = bundle.keys.len();
                        let accepted = self.storage().receive_keys(bundle.keys);
                        if received > 0 {
                            info!(
                                node = %self.id(),
                                donor = %donor,
                                received,
                                accepted,
                                "keys transferred"
                            );
                        }
                    }
                    Err(err) => warn!(node = %self.id(), donor = %donor, %err, "bad transfer reply"),
                },
                Err(err) => warn!(node = %self.id(), donor = %donor, %err, "key transfer failed"),
            }
        }
    }
}
