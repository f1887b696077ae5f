//! Message envelope and typed payloads.
//!
//! Every frame on the wire is a JSON object:
//!
//! ```json
//! {"msg_type": "...", "sender_id": 5, "sender_address": "host:port",
//!  "msg_id": "uuid", "data": {...}}
//! ```
//!
//! `msg_id` is a client-generated correlation token; a reply carries the
//! token of the request it answers. The message set is a closed
//! enumeration: an unknown `msg_type` fails to parse and the dispatcher
//! answers with `ERROR`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use corelib::{Id, NodeRef, Value, VectorClock, VersionedValue};

use crate::error::{Result, WireError};

/// Types of messages exchanged between ring nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Ring protocol
    FindSuccessor,
    FindSuccessorReply,
    GetPredecessor,
    GetPredecessorReply,
    GetSuccessorList,
    GetSuccessorListReply,
    Notify,

    // Data operations
    Put,
    PutReply,
    Get,
    GetReply,

    // Replication
    PutReplica,
    PutReplicaReply,
    GetReplica,
    GetReplicaReply,

    // Membership
    GetAllNodes,
    GetAllNodesReply,
    BroadcastJoin,
    BroadcastJoinAck,
    TransferKeysRequest,
    TransferKeysResponse,

    // Hinted-handoff recovery
    RecoverHandoff,
    RecoverHandoffReply,
    UpdateBackup,
    UpdateBackupAck,

    // Debug / status
    GetAllKeys,
    GetAllKeysReply,
    GetRingInfo,
    GetRingInfoReply,
    Ping,
    Pong,

    // Error
    Error,
}

impl MessageType {
    /// The wire spelling of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FindSuccessor => "FIND_SUCCESSOR",
            MessageType::FindSuccessorReply => "FIND_SUCCESSOR_REPLY",
            MessageType::GetPredecessor => "GET_PREDECESSOR",
            MessageType::GetPredecessorReply => "GET_PREDECESSOR_REPLY",
            MessageType::GetSuccessorList => "GET_SUCCESSOR_LIST",
            MessageType::GetSuccessorListReply => "GET_SUCCESSOR_LIST_REPLY",
            MessageType::Notify => "NOTIFY",
            MessageType::Put => "PUT",
            MessageType::PutReply => "PUT_REPLY",
            MessageType::Get => "GET",
            MessageType::GetReply => "GET_REPLY",
            MessageType::PutReplica => "PUT_REPLICA",
            MessageType::PutReplicaReply => "PUT_REPLICA_REPLY",
            MessageType::GetReplica => "GET_REPLICA",
            MessageType::GetReplicaReply => "GET_REPLICA_REPLY",
            MessageType::GetAllNodes => "GET_ALL_NODES",
            MessageType::GetAllNodesReply => "GET_ALL_NODES_REPLY",
            MessageType::BroadcastJoin => "BROADCAST_JOIN",
            MessageType::BroadcastJoinAck => "BROADCAST_JOIN_ACK",
            MessageType::TransferKeysRequest => "TRANSFER_KEYS_REQUEST",
            MessageType::TransferKeysResponse => "TRANSFER_KEYS_RESPONSE",
            MessageType::RecoverHandoff => "RECOVER_HANDOFF",
            MessageType::RecoverHandoffReply => "RECOVER_HANDOFF_REPLY",
            MessageType::UpdateBackup => "UPDATE_BACKUP",
            MessageType::UpdateBackupAck => "UPDATE_BACKUP_ACK",
            MessageType::GetAllKeys => "GET_ALL_KEYS",
            MessageType::GetAllKeysReply => "GET_ALL_KEYS_REPLY",
            MessageType::GetRingInfo => "GET_RING_INFO",
            MessageType::GetRingInfoReply => "GET_RING_INFO_REPLY",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub sender_id: Id,
    pub sender_address: String,
    pub msg_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Build a request with a fresh correlation token.
    pub fn request(
        msg_type: MessageType,
        sender: &NodeRef,
        data: impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            msg_type,
            sender_id: sender.id,
            sender_address: sender.address.clone(),
            msg_id: uuid::Uuid::new_v4().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Build the reply to this envelope, echoing its correlation token.
    pub fn reply(
        &self,
        msg_type: MessageType,
        sender: &NodeRef,
        data: impl Serialize,
    ) -> Result<Envelope> {
        Ok(Envelope {
            msg_type,
            sender_id: sender.id,
            sender_address: sender.address.clone(),
            msg_id: self.msg_id.clone(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Build an ERROR reply carrying `error` as text.
    pub fn error_reply(&self, sender: &NodeRef, error: impl fmt::Display) -> Envelope {
        Envelope {
            msg_type: MessageType::Error,
            sender_id: sender.id,
            sender_address: sender.address.clone(),
            msg_id: self.msg_id.clone(),
            data: serde_json::json!({ "error": error.to_string() }),
        }
    }

    /// A copy of this envelope re-stamped with a new sender but the same
    /// `msg_id`. Used when forwarding a client request so the eventual
    /// reply still correlates at the original caller.
    pub fn forwarded(&self, sender: &NodeRef) -> Envelope {
        Envelope {
            msg_type: self.msg_type,
            sender_id: sender.id,
            sender_address: sender.address.clone(),
            msg_id: self.msg_id.clone(),
            data: self.data.clone(),
        }
    }

    /// Decode the `data` object into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// If this envelope is an ERROR reply, surface it as a [`WireError`].
    pub fn into_checked(self) -> Result<Envelope> {
        if self.msg_type == MessageType::Error {
            let text = self.data["error"]
                .as_str()
                .unwrap_or("unspecified remote error")
                .to_owned();
            Err(WireError::Remote(text))
        } else {
            Ok(self)
        }
    }

    /// The sender as a node reference.
    pub fn sender(&self) -> NodeRef {
        NodeRef::new(self.sender_id, self.sender_address.clone())
    }
}

/// Reply status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

// ---------------------------------------------------------------------------
// Typed payloads, one per data-carrying message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindSuccessor {
    pub identifier: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindSuccessorReply {
    pub successor: Option<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredecessorReply {
    pub predecessor: Option<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessorListReply {
    pub successor_list: Vec<NodeRef>,
}

/// NOTIFY and BROADCAST_JOIN both announce one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAnnounce {
    pub node_id: Id,
    pub address: String,
}

impl From<&NodeRef> for NodeAnnounce {
    fn from(node: &NodeRef) -> Self {
        Self {
            node_id: node.id,
            address: node.address.clone(),
        }
    }
}

impl NodeAnnounce {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.node_id, self.address.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutReply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PutReply {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReply {
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VectorClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GetReply {
    pub fn found(value: Value, version: VectorClock) -> Self {
        Self {
            value: Some(value),
            version: Some(version),
            error: None,
        }
    }

    pub fn absent() -> Self {
        Self {
            value: None,
            version: None,
            error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            value: None,
            version: None,
            error: Some(text.into()),
        }
    }
}

/// PUT_REPLICA and UPDATE_BACKUP carry the same record; the tag tells the
/// receiver which bucket of its backup store the entry belongs to (the
/// primary may differ from the sender under sloppy quorum).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaWrite {
    pub key: String,
    pub value: Value,
    pub version: VectorClock,
    pub primary_node_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutReplicaReply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VectorClock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReplicaRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_node_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReplicaReply {
    pub value: Option<Value>,
    pub version: Option<VectorClock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesReply {
    pub nodes: Vec<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub status: Status,
}

impl Ack {
    pub fn ok() -> Self {
        Self { status: Status::Ok }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferKeysRequest {
    pub new_node_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_id: Option<Id>,
}

/// TRANSFER_KEYS_RESPONSE and RECOVER_HANDOFF_REPLY both carry a key bundle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyBundle {
    pub keys: HashMap<String, VersionedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverHandoff {
    pub requesting_node_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDigest {
    pub value: Value,
    pub hash: Id,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllKeysReply {
    pub keys: HashMap<String, KeyDigest>,
    pub node_id: Id,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingMember {
    pub node_id: Id,
    pub address: String,
    pub predecessor: Option<NodeRef>,
    pub successor: Option<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingInfoReply {
    pub ring_nodes: Vec<RingMember>,
    pub ring_size: u64,
    pub m: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongReply {
    pub status: String,
}

impl PongReply {
    pub fn alive() -> Self {
        Self {
            status: "alive".to_owned(),
        }
    }
}

/// Empty payload for messages that carry no data.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}
