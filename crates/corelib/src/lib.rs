//! Core library for the replicated Chord key-value store.
//!
//! This crate provides the fundamental abstractions shared by every node:
//! - Identifier space and circular range algebra
//! - Node references (identifier + address)
//! - Vector clocks and versioned values
//! - Ring view: finger table, full membership, successor list
//! - Dual primary/backup storage with an optional disk mirror

pub mod error;
pub mod id;
pub mod node;
pub mod ring;
pub mod storage;
pub mod version;

pub use error::{Error, Result};
pub use id::{in_arc, Id, KeySpace};
pub use node::NodeRef;
pub use ring::{FingerTable, RingView};
pub use storage::NodeStorage;
pub use version::{resolve_latest, Value, VectorClock, VersionedValue};
