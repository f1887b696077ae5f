//! Vector clocks and versioned values.
//!
//! Every stored value carries a vector clock: a map from node identifier to
//! a monotonically increasing counter. Clocks define the causal order on key
//! versions:
//!
//! - `A <= B` iff every counter in `A` is `<=` the matching counter in `B`
//! - `A < B` (happens-before) iff `A <= B` and some counter is strictly less
//! - `A` and `B` are concurrent iff neither happens before the other
//!
//! Missing entries are treated as zero everywhere, including equality.
//!
//! # Wire form
//!
//! Clocks serialize as `{stringified-id: integer}` (JSON objects cannot
//! have integer keys). Deserialization re-parses the keys to integers, so a
//! round-tripped clock compares equal to the original.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::id::Id;

/// Per-key causal version: `{node_id: counter}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<u64, u64>,
}

impl VectorClock {
    /// The empty clock (all counters zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from explicit entries. Useful in tests.
    pub fn from_entries(entries: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Counter for a node, zero if absent.
    pub fn counter(&self, node: Id) -> u64 {
        self.entries.get(&node.0).copied().unwrap_or(0)
    }

    /// True if no counter is positive.
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|&c| c == 0)
    }

    /// Bump this node's counter by exactly one.
    pub fn increment(&mut self, node: Id) {
        *self.entries.entry(node.0).or_insert(0) += 1;
    }

    /// Element-wise maximum with `other` (the clock join).
    pub fn update(&mut self, other: &VectorClock) {
        for (&node, &counter) in &other.entries {
            let entry = self.entries.entry(node).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    /// The join of `self` and `other` as a new clock, leaving both inputs
    /// untouched.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.update(other);
        out
    }

    fn ids_of_both<'a>(&'a self, other: &'a VectorClock) -> BTreeSet<u64> {
        self.entries
            .keys()
            .chain(other.entries.keys())
            .copied()
            .collect()
    }

    /// Strict causal precedence: `self < other`.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;
        for node in self.ids_of_both(other) {
            let a = self.entries.get(&node).copied().unwrap_or(0);
            let b = other.entries.get(&node).copied().unwrap_or(0);
            if a > b {
                return false;
            }
            if a < b {
                strictly_less = true;
            }
        }
        strictly_less
    }

    /// `self >= other` in every component.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.ids_of_both(other).into_iter().all(|node| {
            self.entries.get(&node).copied().unwrap_or(0)
                >= other.entries.get(&node).copied().unwrap_or(0)
        })
    }

    /// Neither clock happens before the other.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        // Missing entries count as zero, so {1:0} equals {}.
        self.ids_of_both(other).into_iter().all(|node| {
            self.entries.get(&node).copied().unwrap_or(0)
                == other.entries.get(&node).copied().unwrap_or(0)
        })
    }
}

impl Eq for VectorClock {}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (node, counter)) in self.entries.iter().filter(|(_, &c)| c > 0).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}:{counter}")?;
        }
        write!(f, "}}")
    }
}

/// Scalar payload carried through the store unchanged.
///
/// The wire and disk formats are JSON; the payload is limited to the scalar
/// shapes that actually cross it, rather than an untyped document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A value together with its causal version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: Value,
    pub version: VectorClock,
}

impl VersionedValue {
    pub fn new(value: impl Into<Value>, version: VectorClock) -> Self {
        Self {
            value: value.into(),
            version,
        }
    }
}

/// The unique maximal version among `versions`, if one exists.
///
/// A version is maximal when no other strictly dominates it. With a single
/// maximal version that version is the latest; with several, the writes were
/// concurrent and `None` signals the conflict to the caller.
pub fn resolve_latest(versions: &[VectorClock]) -> Option<&VectorClock> {
    match versions {
        [] => None,
        [only] => Some(only),
        _ => {
            let mut candidates = versions
                .iter()
                .filter(|v| !versions.iter().any(|other| v.happens_before(other)));
            let first = candidates.next()?;
            // Several distinct maximal clocks means concurrency. Equal clocks
            // can appear more than once among the maximals; they are no
            // conflict.
            if candidates.all(|c| c == first) {
                Some(first)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clock(entries: &[(u64, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().copied())
    }

    #[test]
    fn test_increment_is_by_one() {
        let mut v = VectorClock::new();
        v.increment(Id(3));
        v.increment(Id(3));
        v.increment(Id(7));
        assert_eq!(v, clock(&[(3, 2), (7, 1)]));
    }

    #[test]
    fn test_update_takes_elementwise_max() {
        let mut a = clock(&[(1, 4), (2, 1)]);
        a.update(&clock(&[(2, 3), (5, 2)]));
        assert_eq!(a, clock(&[(1, 4), (2, 3), (5, 2)]));
    }

    #[test]
    fn test_happens_before() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(1, 2)]);
        assert!(a.happens_before(&b));
        assert!(!b.happens_before(&a));
        assert!(!a.happens_before(&a));
    }

    #[test]
    fn test_concurrency() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(2, 1)]);
        assert!(a.concurrent_with(&b));
        assert!(!a.concurrent_with(&a));

        // The join of two concurrent clocks dominates both.
        let joined = a.merged(&b);
        assert!(joined.dominates(&a));
        assert!(joined.dominates(&b));
    }

    #[test]
    fn test_missing_entries_are_zero() {
        assert_eq!(clock(&[(1, 0)]), VectorClock::new());
        assert!(clock(&[(1, 1)]).dominates(&clock(&[(1, 1), (2, 0)])));
    }

    #[test]
    fn test_wire_round_trip_reparses_string_keys() {
        let original = clock(&[(50, 2), (7, 1)]);
        let json = serde_json::to_string(&original).unwrap();
        // JSON objects stringify the integer keys.
        assert!(json.contains("\"50\""));
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
        assert_eq!(back.counter(Id(50)), 2);
    }

    #[test]
    fn test_resolve_latest_singleton() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(1, 2), (2, 1)]);
        let versions = vec![a, b.clone()];
        let latest = resolve_latest(&versions).expect("unique maximum");
        assert_eq!(latest, &b);
    }

    #[test]
    fn test_resolve_latest_conflict() {
        let a = clock(&[(1, 1)]);
        let b = clock(&[(2, 1)]);
        assert!(resolve_latest(&[a, b]).is_none());
    }

    #[test]
    fn test_resolve_latest_duplicate_maximum_is_no_conflict() {
        let a = clock(&[(1, 2)]);
        assert!(resolve_latest(&[a.clone(), a.clone(), clock(&[(1, 1)])]).is_some());
    }

    #[test]
    fn test_value_union_round_trip() {
        for value in [
            Value::Text("v".into()),
            Value::Int(-3),
            Value::Float(2.5),
            Value::Bool(true),
        ] {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    proptest! {
        /// from_dict(to_dict(C)) == C for arbitrary clocks.
        #[test]
        fn prop_serde_round_trip(entries in proptest::collection::btree_map(0u64..64, 1u64..100, 0..6)) {
            let original = VectorClock::from_entries(entries);
            let json = serde_json::to_string(&original).unwrap();
            let back: VectorClock = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, original);
        }

        /// The join dominates both operands.
        #[test]
        fn prop_join_dominates(
            a in proptest::collection::btree_map(0u64..16, 1u64..50, 0..5),
            b in proptest::collection::btree_map(0u64..16, 1u64..50, 0..5),
        ) {
            let a = VectorClock::from_entries(a);
            let b = VectorClock::from_entries(b);
            let joined = a.merged(&b);
            prop_assert!(joined.dominates(&a));
            prop_assert!(joined.dominates(&b));
        }

        /// happens_before is a strict partial order: irreflexive and
        /// asymmetric.
        #[test]
        fn prop_happens_before_strict(
            a in proptest::collection::btree_map(0u64..16, 1u64..50, 0..5),
            b in proptest::collection::btree_map(0u64..16, 1u64..50, 0..5),
        ) {
            let a = VectorClock::from_entries(a);
            let b = VectorClock::from_entries(b);
            prop_assert!(!a.happens_before(&a));
            if a.happens_before(&b) {
                prop_assert!(!b.happens_before(&a));
            }
        }
    }
}
