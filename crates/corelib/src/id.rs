//! Identifier space and circular range algebra.
//!
//! Keys and node addresses are hashed into a modular space of size `2^m`
//! (SHA-1, truncated by modulo). The space is circular: every routing
//! predicate, from responsibility checks to the stabilize decision, reduces
//! to arc containment, which [`in_arc`] answers with explicit
//! inclusive/exclusive bounds.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

use crate::error::{Error, Result};

/// Position on the identifier circle.
///
/// Newtype over `u64` so comparisons and hashing are cheap. Valid values are
/// `0..2^m` for the [`KeySpace`] that produced them.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Id(pub u64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(raw: u64) -> Self {
        Id(raw)
    }
}

/// The `mod 2^m` identifier space.
///
/// Hashing is deterministic: the same key or address always lands on the
/// same position, on every node that agrees on `m`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    m: u32,
}

impl KeySpace {
    /// Create a space of size `2^m`. `m` must be in `1..=63`.
    pub fn new(m: u32) -> Result<Self> {
        if !(1..=63).contains(&m) {
            return Err(Error::InvalidSpace(format!(
                "m must be in 1..=63, got {m}"
            )));
        }
        Ok(Self { m })
    }

    /// Bit width of the space (number of finger-table entries).
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Number of positions on the circle, `2^m`.
    pub fn size(&self) -> u64 {
        1u64 << self.m
    }

    /// Hash arbitrary bytes onto the circle.
    ///
    /// SHA-1 of the input, interpreted as a big-endian integer, reduced
    /// modulo `2^m`. Since the modulus is a power of two this keeps the low
    /// `m` bits of the digest.
    pub fn hash_bytes(&self, data: &[u8]) -> Id {
        let digest = Sha1::digest(data);
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&digest[12..20]);
        Id(u64::from_be_bytes(tail) & (self.size() - 1))
    }

    /// Hash a key onto the circle.
    pub fn hash_key(&self, key: &str) -> Id {
        self.hash_bytes(key.as_bytes())
    }

    /// Hash a node address (`host:port`) onto the circle. A node's
    /// identifier is always the hash of its advertised address.
    pub fn hash_address(&self, address: &str) -> Id {
        self.hash_bytes(address.as_bytes())
    }

    /// The start of finger interval `i`: `(base + 2^i) mod 2^m`.
    pub fn finger_start(&self, base: Id, i: u32) -> Id {
        Id((base.0.wrapping_add(1u64 << i)) & (self.size() - 1))
    }
}

/// Arc containment on the circle, walking clockwise from `start` to `end`.
///
/// # Algorithm
///
/// - `start == end`: the arc is the whole circle
/// - `start < end`: the straight interval between them
/// - `start > end`: the arc wraps through zero, so membership means being
///   past `start` **or** before `end`
///
/// The two flags control whether the endpoints themselves belong to the
/// arc; every routing predicate in the system is one choice of them.
pub fn in_arc(x: Id, start: Id, end: Id, include_start: bool, include_end: bool) -> bool {
    if start == end {
        return true;
    }
    let after_start = if include_start { x >= start } else { x > start };
    let before_end = if include_end { x <= end } else { x < end };
    if start < end {
        after_start && before_end
    } else {
        after_start || before_end
    }
}

/// Membership in the half-open arc `(start, end]`, the responsibility
/// interval of the node at `end`.
pub fn in_arc_open_closed(x: Id, start: Id, end: Id) -> bool {
    in_arc(x, start, end, false, true)
}

/// Membership in the open arc `(start, end)`.
pub fn in_arc_open(x: Id, start: Id, end: Id) -> bool {
    in_arc(x, start, end, false, false)
}
