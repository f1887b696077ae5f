//! Replica fan-out.
//!
//! All fan-out is parallel with a fixed per-target timeout and per-target
//! error isolation: one replica failing, timing out or replying garbage
//! never cancels the others. Results preserve input order, which makes the
//! coordinator's "first received" conflict pick deterministic.

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use corelib::{Id, NodeRef, Value, VectorClock};
use wire::message::{GetReplicaReply, GetReplicaRequest, PutReplicaReply, ReplicaWrite, Status};
use wire::{call_checked, Envelope, MessageType};

/// Timeout applied to each individual replica operation.
pub const REPLICA_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends replica traffic on behalf of one node.
#[derive(Clone)]
pub struct Replicator {
    local: NodeRef,
}

impl Replicator {
    pub fn new(local: NodeRef) -> Self {
        Self { local }
    }

    /// Issue PUT_REPLICA to every replica in parallel. Returns the replicas
    /// that acknowledged. `primary` tags which backup bucket the entry
    /// belongs to on the receiving side; under sloppy quorum it names a
    /// node that is not the sender.
    pub async fn replicate_put(
        &self,
        key: &str,
        value: &Value,
        version: &VectorClock,
        replicas: &[NodeRef],
        primary: Id,
    ) -> Vec<NodeRef> {
        if replicas.is_empty() {
            return Vec::new();
        }
        debug!(node = %self.local.id, key, replicas = replicas.len(), "replicating put");
        let sends = replicas
            .iter()
            .map(|replica| self.send_put_replica(replica, key, value, version, primary));
        join_all(sends)
            .await
            .into_iter()
            .zip(replicas)
            .filter_map(|(acked, replica)| acked.then(|| replica.clone()))
            .collect()
    }

    async fn send_put_replica(
        &self,
        replica: &NodeRef,
        key: &str,
        value: &Value,
        version: &VectorClock,
        primary: Id,
    ) -> bool {
        let write = ReplicaWrite {
            key: key.to_owned(),
            value: value.clone(),
            version: version.clone(),
            primary_node_id: primary,
        };
        let request = match Envelope::request(MessageType::PutReplica, &self.local, write) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, key, "could not encode PUT_REPLICA");
                return false;
            }
        };
        match call_checked(&replica.address, &request, REPLICA_TIMEOUT).await {
            Ok(reply) => match reply.payload::<PutReplicaReply>() {
                Ok(ack) => ack.status == Status::Ok,
                Err(err) => {
                    warn!(%err, target = %replica, "malformed PUT_REPLICA_REPLY");
                    false
                }
            },
            Err(err) => {
                warn!(%err, target = %replica, key, "PUT_REPLICA failed");
                false
            }
        }
    }

    /// Issue GET_REPLICA to every replica in parallel and collect the
    /// responses that carried a value, in input order.
    pub async fn replicate_get(
        &self,
        key: &str,
        replicas: &[NodeRef],
        primary_hint: Option<Id>,
    ) -> Vec<(NodeRef, Value, VectorClock)> {
        if replicas.is_empty() {
            return Vec::new();
        }
        debug!(node = %self.local.id, key, replicas = replicas.len(), "reading replicas");
        let sends = replicas
            .iter()
            .map(|replica| self.send_get_replica(replica, key, primary_hint));
        join_all(sends)
            .await
            .into_iter()
            .zip(replicas)
            .filter_map(|(read, replica)| {
                read.map(|(value, version)| (replica.clone(), value, version))
            })
            .collect()
    }

    async fn send_get_replica(
        &self,
        replica: &NodeRef,
        key: &str,
        primary_hint: Option<Id>,
    ) -> Option<(Value, VectorClock)> {
        let request = Envelope::request(
            MessageType::GetReplica,
            &self.local,
            GetReplicaRequest {
                key: key.to_owned(),
                primary_node_id: primary_hint,
            },
        )
        .ok()?;
        match call_checked(&replica.address, &request, REPLICA_TIMEOUT).await {
            Ok(reply) => {
                let reply = reply.payload::<GetReplicaReply>().ok()?;
                match (reply.value, reply.version) {
                    (Some(value), Some(version)) => Some((value, version)),
                    _ => None,
                }
            }
            Err(err) => {
                warn!(%err, target = %replica, key, "GET_REPLICA failed");
                None
            }
        }
    }

    /// Fire-and-forget PUT_REPLICA broadcast to replicas that returned a
    /// strictly older version during a quorum read.
    pub fn spawn_repair(
        &self,
        key: String,
        value: Value,
        version: VectorClock,
        stale: Vec<NodeRef>,
        primary: Id,
    ) {
        if stale.is_empty() {
            return;
        }
        let replicator = self.clone();
        tokio::spawn(async move {
            debug!(node = %replicator.local.id, key, stale = stale.len(), "read-repair");
            let repaired = replicator
                .replicate_put(&key, &value, &version, &stale, primary)
                .await;
            debug!(
                node = %replicator.local.id,
                key,
                repaired = repaired.len(),
                "read-repair complete"
            );
        });
    }
}
