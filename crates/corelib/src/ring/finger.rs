//! Chord finger table.

use crate::id::{in_arc_open, Id, KeySpace};
use crate::node::NodeRef;
use std::fmt;

/// The `m`-entry routing table of one node.
///
/// Entry `i` covers the interval starting at `(self + 2^i) mod 2^m` and
/// points at the first known node at or past that start. Entry `0` is the
/// immediate successor.
#[derive(Clone, Debug)]
pub struct FingerTable {
    node_id: Id,
    entries: Vec<Option<NodeRef>>,
    starts: Vec<Id>,
}

impl FingerTable {
    pub fn new(node_id: Id, space: &KeySpace) -> Self {
        let m = space.m();
        Self {
            node_id,
            entries: vec![None; m as usize],
            starts: (0..m).map(|i| space.finger_start(node_id, i)).collect(),
        }
    }

    /// Number of entries (`m`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached start of finger interval `i`.
    pub fn start(&self, i: usize) -> Id {
        self.starts[i]
    }

    pub fn get(&self, i: usize) -> Option<&NodeRef> {
        self.entries.get(i).and_then(|e| e.as_ref())
    }

    pub fn set(&mut self, i: usize, node: NodeRef) {
        if i < self.entries.len() {
            self.entries[i] = Some(node);
        }
    }

    /// The immediate successor (entry 0).
    pub fn successor(&self) -> Option<&NodeRef> {
        self.get(0)
    }

    pub fn set_successor(&mut self, node: NodeRef) {
        self.set(0, node);
    }

    pub fn clear_successor(&mut self) {
        self.entries[0] = None;
    }

    /// Scan fingers from highest index to lowest and return the first whose
    /// id lies strictly inside `(self, target)` on the circle.
    pub fn closest_preceding(&self, target: Id) -> Option<&NodeRef> {
        self.entries
            .iter()
            .rev()
            .flatten()
            .find(|finger| in_arc_open(finger.id, self.node_id, target))
    }

    /// Drop every entry pointing at `node_id` (used when a peer is removed).
    pub fn forget(&mut self, node_id: Id) {
        for entry in &mut self.entries {
            if entry.as_ref().is_some_and(|n| n.id == node_id) {
                *entry = None;
            }
        }
    }
}

impl fmt::Display for FingerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FingerTable for node {}:", self.node_id)?;
        let mut any = false;
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(node) = entry {
                writeln!(f, "  [{i}] start={} -> {node}", self.starts[i])?;
                any = true;
            }
        }
        if !any {
            writeln!(f, "  (empty)")?;
        }
        Ok(())
    }
}
