//! Wire protocol for inter-node communication.
//!
//! This crate provides the protocol and codecs for node-to-node traffic:
//! - The closed message enumeration and typed payloads
//! - Length-prefixed JSON framing
//! - TCP transport: per-type handler dispatch, request/response
//!   correlation, per-call timeouts

pub mod codec;
pub mod error;
pub mod message;
pub mod transport;

pub use error::{Result, WireError};
pub use message::{Envelope, MessageType};
pub use transport::{bind, call, call_checked, cast, HandlerRegistry, Server};
