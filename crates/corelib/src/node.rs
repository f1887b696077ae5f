//! Node references.
//!
//! A [`NodeRef`] is a reference by identifier, not an ownership edge: nodes
//! mention each other as plain `(id, address)` records copied by value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::id::Id;

/// Immutable reference to a ring member.
///
/// Equality and hashing are on `id` only; `id` is always the hash of
/// `address` in the ring's key space, so two refs with equal ids name the
/// same node even while an address update is propagating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "node_id")]
    pub id: Id,
    pub address: String,
}

impl NodeRef {
    pub fn new(id: Id, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}, {})", self.id, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_on_id() {
        let a = NodeRef::new(Id(5), "localhost:5000");
        let b = NodeRef::new(Id(5), "10.0.0.1:5000");
        let c = NodeRef::new(Id(6), "localhost:5000");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_wire_record_shape() {
        let node = NodeRef::new(Id(42), "localhost:5001");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["node_id"], 42);
        assert_eq!(json["address"], "localhost:5001");
    }
}
