//! Handler registration and the ring-protocol handler suite.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use wire::message::{self as msg, MessageType};
use wire::transport::{HandlerError, HandlerFn};
use wire::{Envelope, HandlerRegistry};

use crate::error::Result;
use crate::node::Node;

/// Wrap a node method as a registered handler. Runtime errors become the
/// dispatcher's ERROR reply.
fn handler<F, Fut>(node: &Arc<Node>, f: F) -> HandlerFn
where
    F: Fn(Arc<Node>, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Envelope>>> + Send + 'static,
{
    let node = Arc::clone(node);
    Arc::new(move |envelope| {
        let fut = f(Arc::clone(&node), envelope);
        Box::pin(async move { fut.await.map_err(|err| Box::new(err) as HandlerError) })
    })
}

/// Assemble the per-type handler table for one node.
pub fn build_registry(node: &Arc<Node>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    // Data operations
    registry.register(
        MessageType::Put,
        handler(node, |n, env| async move { n.handle_put(env).await }),
    );
    registry.register(
        MessageType::Get,
        handler(node, |n, env| async move { n.handle_get(env).await }),
    );
    registry.register(
        MessageType::PutReplica,
        handler(node, |n, env| async move { n.handle_put_replica(env).await }),
    );
    registry.register(
        MessageType::GetReplica,
        handler(node, |n, env| async move { n.handle_get_replica(env).await }),
    );
    registry.register(
        MessageType::UpdateBackup,
        handler(node, |n, env| async move { n.handle_update_backup(env).await }),
    );

    // Ring protocol
    registry.register(
        MessageType::FindSuccessor,
        handler(node, |n, env| async move { n.handle_find_successor(env) }),
    );
    registry.register(
        MessageType::GetPredecessor,
        handler(node, |n, env| async move { n.handle_get_predecessor(env) }),
    );
    registry.register(
        MessageType::GetSuccessorList,
        handler(node, |n, env| async move { n.handle_get_successor_list(env) }),
    );
    registry.register(
        MessageType::Notify,
        handler(node, |n, env| async move { n.handle_notify(env) }),
    );

    // Membership
    registry.register(
        MessageType::GetAllNodes,
        handler(node, |n, env| async move { n.handle_get_all_nodes(env) }),
    );
    registry.register(
        MessageType::BroadcastJoin,
        handler(node, |n, env| async move { n.handle_broadcast_join(env) }),
    );
    registry.register(
        MessageType::TransferKeysRequest,
        handler(node, |n, env| async move { n.handle_transfer_keys(env) }),
    );
    registry.register(
        MessageType::RecoverHandoff,
        handler(node, |n, env| async move { n.handle_recover_handoff(env) }),
    );

    // Debug / status
    registry.register(
        MessageType::GetAllKeys,
        handler(node, |n, env| async move { n.handle_get_all_keys(env) }),
    );
    registry.register(
        MessageType::GetRingInfo,
        handler(node, |n, env| async move { n.handle_get_ring_info(env) }),
    );
    registry.register(
        MessageType::Ping,
        handler(node, |n, env| async move { n.handle_ping(env) }),
    );

    registry
}

impl Node {
    pub(crate) fn handle_find_successor(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::FindSuccessor = envelope.payload()?;
        let successor = self.ring.read().find_successor(request.identifier);
        debug!(
            node = %self.id(),
            identifier = %request.identifier,
            successor = successor.as_ref().map(|n| n.id.0),
            "FIND_SUCCESSOR"
        );
        Ok(Some(envelope.reply(
            MessageType::FindSuccessorReply,
            self.local(),
            msg::FindSuccessorReply { successor },
        )?))
    }

    pub(crate) fn handle_get_predecessor(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let predecessor = self.ring.read().predecessor().cloned();
        Ok(Some(envelope.reply(
            MessageType::GetPredecessorReply,
            self.local(),
            msg::PredecessorReply { predecessor },
        )?))
    }

    pub(crate) fn handle_get_successor_list(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let successor_list: Vec<_> = self
            .ring
            .read()
            .successor_list()
            .iter()
            .filter(|n| n.id != self.id())
            .cloned()
            .collect();
        Ok(Some(envelope.reply(
            MessageType::GetSuccessorListReply,
            self.local(),
            msg::SuccessorListReply { successor_list },
        )?))
    }

    /// NOTIFY is fire-and-forget: adopt the sender as predecessor when we
    /// have none or it sits between the current predecessor and us.
    pub(crate) fn handle_notify(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let announce: msg::NodeAnnounce = envelope.payload()?;
        let sender = announce.node_ref();
        let mut ring = self.ring.write();
        let adopt = match ring.predecessor() {
            None => sender.id != self.id(),
            Some(current) => {
                corelib::id::in_arc_open(sender.id, current.id, self.id())
            }
        };
        if adopt {
            info!(node = %self.id(), predecessor = %sender, "adopted predecessor");
            ring.set_predecessor(sender);
        }
        Ok(None)
    }

    pub(crate) fn handle_get_all_nodes(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let ring = self.ring.read();
        let mut known: HashMap<corelib::Id, corelib::NodeRef> = ring
            .all_nodes()
            .iter()
            .map(|n| (n.id, n.clone()))
            .collect();
        known.insert(self.id(), self.local().clone());
        if let Some(pred) = ring.predecessor() {
            known.insert(pred.id, pred.clone());
        }
        for n in ring.successor_list() {
            known.entry(n.id).or_insert_with(|| n.clone());
        }
        let mut nodes: Vec<_> = known.into_values().collect();
        nodes.sort_by_key(|n| n.id);
        debug!(node = %self.id(), count = nodes.len(), "GET_ALL_NODES");
        Ok(Some(envelope.reply(
            MessageType::GetAllNodesReply,
            self.local(),
            msg::NodesReply { nodes },
        )?))
    }

    pub(crate) fn handle_broadcast_join(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let announce: msg::NodeAnnounce = envelope.payload()?;
        let joiner = announce.node_ref();
        info!(node = %self.id(), joiner = %joiner, "BROADCAST_JOIN");
        self.ring.write().add_node(joiner);
        Ok(Some(envelope.reply(
            MessageType::BroadcastJoinAck,
            self.local(),
            msg::Ack::ok(),
        )?))
    }

    /// TRANSFER_KEYS_REQUEST: hand the joiner every primary entry hashing
    /// into its new responsibility arc. Entries are copied, not removed;
    /// version dominance reconciles the duplicates later.
    pub(crate) fn handle_transfer_keys(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::TransferKeysRequest = envelope.payload()?;
        let start = request.predecessor_id.unwrap_or(self.id());
        let keys: HashMap<_, _> = self
            .storage()
            .keys_in_range(start, request.new_node_id)
            .into_iter()
            .collect();
        info!(
            node = %self.id(),
            joiner = %request.new_node_id,
            count = keys.len(),
            "transferring keys"
        );
        Ok(Some(envelope.reply(
            MessageType::TransferKeysResponse,
            self.local(),
            msg::KeyBundle { keys },
        )?))
    }

    /// RECOVER_HANDOFF: return everything held for the rejoining node and
    /// drop it locally; the handoff is complete once it is on the wire.
    pub(crate) fn handle_recover_handoff(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::RecoverHandoff = envelope.payload()?;
        let keys = self.storage().take_backups_for(request.requesting_node_id);
        info!(
            node = %self.id(),
            rejoined = %request.requesting_node_id,
            count = keys.len(),
            "handing hinted backups back"
        );
        Ok(Some(envelope.reply(
            MessageType::RecoverHandoffReply,
            self.local(),
            msg::KeyBundle { keys },
        )?))
    }

    pub(crate) fn handle_ping(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        Ok(Some(envelope.reply(
            MessageType::Pong,
            self.local(),
            msg::PongReply::alive(),
        )?))
    }

    pub(crate) fn handle_get_all_keys(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let keys: HashMap<String, msg::KeyDigest> = self
            .storage()
            .all_primary()
            .into_iter()
            .map(|(key, entry)| {
                let digest = msg::KeyDigest {
                    hash: self.space().hash_key(&key),
                    version: Some(entry.version.to_string()),
                    value: entry.value,
                };
                (key, digest)
            })
            .collect();
        let reply = msg::AllKeysReply {
            node_id: self.id(),
            address: self.address().to_owned(),
            keys,
        };
        Ok(Some(envelope.reply(MessageType::GetAllKeysReply, self.local(), reply)?))
    }

    pub(crate) fn handle_get_ring_info(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let ring = self.ring.read();
        let mut members = vec![msg::RingMember {
            node_id: self.id(),
            address: self.address().to_owned(),
            predecessor: ring.predecessor().cloned(),
            successor: ring.successor().cloned(),
        }];
        let mut seen: std::collections::HashSet<corelib::Id> =
            std::collections::HashSet::from([self.id()]);
        for peer in ring.successor_list().iter().chain(ring.predecessor()) {
            if seen.insert(peer.id) {
                members.push(msg::RingMember {
                    node_id: peer.id,
                    address: peer.address.clone(),
                    predecessor: None,
                    successor: None,
                });
            }
        }
        let reply = msg::RingInfoReply {
            ring_nodes: members,
            ring_size: self.space().size(),
            m: self.space().m(),
        };
        Ok(Some(envelope.reply(MessageType::GetRingInfoReply, self.local(), reply)?))
    }
}
