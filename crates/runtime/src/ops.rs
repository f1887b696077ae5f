//! Client data operations and replica-side handlers.
//!
//! # PUT
//!
//! A client PUT may land on any node. The receiver chases responsibility
//! for the key's hash and forwards when the primary is elsewhere, relaying
//! the reply under the original correlation token. When the primary cannot
//! be reached, the receiver degrades to a sloppy quorum: it files the write
//! in its own backup store as a hint targeted at the primary's id, fans out
//! to the remaining replicas with the same tag, and still counts
//! acknowledgments against W.
//!
//! # GET
//!
//! Mirrors PUT: forward when not responsible, otherwise answer from the
//! primary store, falling back to the hinted backup bucket (sloppy-quorum
//! recovery read) and finally to the replicas. Every path accounts reads
//! against R, with the local copy counting as one.

use tracing::{debug, info, warn};

use corelib::VectorClock;
use wire::message::{self as msg, MessageType};
use wire::Envelope;

use crate::error::Result;
use crate::node::{Node, FORWARD_TIMEOUT};

impl Node {
    pub(crate) async fn handle_put(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::PutRequest = envelope.payload()?;
        let key_hash = self.space().hash_key(&request.key);
        info!(node = %self.id(), key = %request.key, hash = %key_hash, "PUT");

        let responsible = self.find_responsible_node(key_hash).await;
        let mut primary_reachable = true;
        if responsible.id != self.id() {
            let forwarded = envelope.forwarded(self.local());
            match wire::call(&responsible.address, &forwarded, FORWARD_TIMEOUT).await {
                Ok(reply) => return Ok(Some(reply)),
                Err(err) => {
                    warn!(
                        node = %self.id(),
                        primary = %responsible,
                        %err,
                        "forward failed, degrading to sloppy quorum"
                    );
                    primary_reachable = false;
                }
            }
        }

        // Local write counts as the first acknowledgment toward W.
        let version = if primary_reachable {
            self.storage().put(&request.key, request.value.clone(), None)
        } else {
            // Hint targeted at the unreachable primary. The empty incoming
            // clock makes the store derive existing-version-plus-increment.
            self.storage().put_backup(
                &request.key,
                request.value.clone(),
                &VectorClock::new(),
                responsible.id,
            )
        };

        let replicas = self.replica_candidates(key_hash, &[self.id(), responsible.id]);
        let reply = match self
            .quorum
            .write_remote(&request.key, &request.value, &version, &replicas, responsible.id)
            .await
        {
            Ok(acks) => {
                debug!(node = %self.id(), key = %request.key, acks = acks + 1, "PUT ok");
                msg::PutReply::ok()
            }
            Err(err) => {
                warn!(node = %self.id(), key = %request.key, %err, "PUT failed");
                msg::PutReply::error(err.to_string())
            }
        };
        Ok(Some(envelope.reply(MessageType::PutReply, self.local(), reply)?))
    }

    pub(crate) async fn handle_get(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::GetRequest = envelope.payload()?;
        let key_hash = self.space().hash_key(&request.key);
        info!(node = %self.id(), key = %request.key, hash = %key_hash, "GET");

        let responsible = self.find_responsible_node(key_hash).await;
        if responsible.id != self.id() {
            let forwarded = envelope.forwarded(self.local());
            match wire::call(&responsible.address, &forwarded, FORWARD_TIMEOUT).await {
                Ok(reply) => return Ok(Some(reply)),
                Err(err) => {
                    warn!(
                        node = %self.id(),
                        primary = %responsible,
                        %err,
                        "forward failed, answering from local state"
                    );
                }
            }
        }

        let r = self.quorum.config().r();
        let reply = if let Some(local_entry) = self.storage().get(&request.key) {
            if r <= 1 {
                msg::GetReply::found(local_entry.value, local_entry.version)
            } else {
                let replicas = self.replica_candidates(key_hash, &[self.id()]);
                match self
                    .quorum
                    .read(&request.key, &replicas, Some(responsible.id), Some(local_entry))
                    .await
                {
                    Ok(winner) => msg::GetReply::found(winner.value, winner.version),
                    Err(err) => msg::GetReply::error(err.to_string()),
                }
            }
        } else if let Some(hinted) = self.storage().get_backup(&request.key, responsible.id) {
            // Sloppy-quorum recovery read: we hold a hint for the primary.
            debug!(node = %self.id(), key = %request.key, primary = %responsible.id, "hinted read");
            if r <= 1 {
                msg::GetReply::found(hinted.value, hinted.version)
            } else {
                let replicas =
                    self.replica_candidates(key_hash, &[self.id(), responsible.id]);
                match self
                    .quorum
                    .read(&request.key, &replicas, Some(responsible.id), Some(hinted))
                    .await
                {
                    Ok(winner) => msg::GetReply::found(winner.value, winner.version),
                    Err(err) => msg::GetReply::error(err.to_string()),
                }
            }
        } else {
            // Nothing local. Ask the replicas; finding no copy at all reads
            // as an absent key, not a quorum failure.
            let replicas = self.replica_candidates(key_hash, &[self.id()]);
            match self
                .quorum
                .read(&request.key, &replicas, Some(responsible.id), None)
                .await
            {
                Ok(winner) => msg::GetReply::found(winner.value, winner.version),
                Err(err) => {
                    debug!(node = %self.id(), key = %request.key, %err, "no copy found");
                    msg::GetReply::absent()
                }
            }
        };
        Ok(Some(envelope.reply(MessageType::GetReply, self.local(), reply)?))
    }

    /// PUT_REPLICA: file the entry in the backup bucket named by the
    /// message. A tag equal to the sender is ordinary replication; any
    /// other tag is a sloppy-quorum hint for a primary that was down.
    pub(crate) async fn handle_put_replica(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let write: msg::ReplicaWrite = envelope.payload()?;
        let stored = self.storage().put_backup(
            &write.key,
            write.value,
            &write.version,
            write.primary_node_id,
        );
        if write.primary_node_id == envelope.sender_id {
            debug!(
                node = %self.id(),
                key = %write.key,
                primary = %write.primary_node_id,
                "backup stored"
            );
        } else {
            info!(
                node = %self.id(),
                key = %write.key,
                primary = %write.primary_node_id,
                from = %envelope.sender_id,
                "hinted backup stored for unreachable primary"
            );
        }
        let reply = msg::PutReplicaReply {
            status: msg::Status::Ok,
            version: Some(stored),
        };
        Ok(Some(envelope.reply(MessageType::PutReplicaReply, self.local(), reply)?))
    }

    /// GET_REPLICA: primary store first, then the hinted bucket, then any
    /// backup bucket holding the key.
    pub(crate) async fn handle_get_replica(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let request: msg::GetReplicaRequest = envelope.payload()?;
        let entry = self
            .storage()
            .get(&request.key)
            .or_else(|| {
                request
                    .primary_node_id
                    .and_then(|primary| self.storage().get_backup(&request.key, primary))
            })
            .or_else(|| self.storage().any_backup(&request.key).map(|(_, e)| e));
        let reply = match entry {
            Some(entry) => msg::GetReplicaReply {
                value: Some(entry.value),
                version: Some(entry.version),
            },
            None => msg::GetReplicaReply {
                value: None,
                version: None,
            },
        };
        Ok(Some(envelope.reply(MessageType::GetReplicaReply, self.local(), reply)?))
    }

    /// UPDATE_BACKUP: a recovered primary pushing its authoritative version
    /// forward to its replica set. The version is installed verbatim;
    /// merge-and-increment here would move the fixed point on every
    /// recovery pass.
    pub(crate) async fn handle_update_backup(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let write: msg::ReplicaWrite = envelope.payload()?;
        self.storage().install_backup(
            &write.key,
            write.value,
            write.version,
            write.primary_node_id,
        );
        debug!(
            node = %self.id(),
            key = %write.key,
            primary = %write.primary_node_id,
            "backup updated after recovery"
        );
        Ok(Some(envelope.reply(
            MessageType::UpdateBackupAck,
            self.local(),
            msg::Ack::ok(),
        )?))
    }
}
