//! Per-node view of the ring.
//!
//! The view combines three layers of knowledge, from weakest to strongest:
//!
//! 1. The finger table and predecessor pointer (classic Chord routing)
//! 2. The successor list (short-range redundancy while knowledge is partial)
//! 3. The sorted full-membership list, gossiped on join
//!
//! Lookups prefer the strongest layer available: with full membership a
//! responsibility query is a single scan; otherwise the finger table yields
//! the next hop and the caller iterates.

use crate::id::{in_arc_open, in_arc_open_closed, Id, KeySpace};
use crate::node::NodeRef;
use crate::ring::finger::FingerTable;

/// Routing state of one node.
///
/// Mutations keep `all_nodes` sorted by id and keep the successor pointer
/// and affected finger entries coherent with it.
#[derive(Clone, Debug)]
pub struct RingView {
    local: NodeRef,
    space: KeySpace,
    fingers: FingerTable,
    predecessor: Option<NodeRef>,
    all_nodes: Vec<NodeRef>,
    successor_list: Vec<NodeRef>,
}

impl RingView {
    pub fn new(local: NodeRef, space: KeySpace) -> Self {
        let fingers = FingerTable::new(local.id, &space);
        Self {
            local,
            space,
            fingers,
            predecessor: None,
            all_nodes: Vec::new(),
            successor_list: Vec::new(),
        }
    }

    pub fn local(&self) -> &NodeRef {
        &self.local
    }

    pub fn space(&self) -> &KeySpace {
        &self.space
    }

    pub fn fingers(&self) -> &FingerTable {
        &self.fingers
    }

    pub fn successor(&self) -> Option<&NodeRef> {
        self.fingers.successor()
    }

    pub fn set_successor(&mut self, node: NodeRef) {
        self.fingers.set_successor(node);
    }

    pub fn set_finger(&mut self, i: usize, node: NodeRef) {
        self.fingers.set(i, node);
    }

    pub fn finger_start(&self, i: usize) -> Id {
        self.fingers.start(i)
    }

    pub fn predecessor(&self) -> Option<&NodeRef> {
        self.predecessor.as_ref()
    }

    pub fn set_predecessor(&mut self, node: NodeRef) {
        self.predecessor = Some(node);
    }

    pub fn clear_predecessor(&mut self) {
        self.predecessor = None;
    }

    pub fn successor_list(&self) -> &[NodeRef] {
        &self.successor_list
    }

    pub fn set_successor_list(&mut self, list: Vec<NodeRef>) {
        self.successor_list = list;
    }

    /// Every node this view believes is in the ring, sorted by id.
    pub fn all_nodes(&self) -> &[NodeRef] {
        &self.all_nodes
    }

    pub fn has_full_view(&self) -> bool {
        !self.all_nodes.is_empty()
    }

    /// Find the node responsible for `id`.
    ///
    /// With full membership this is authoritative: the first node whose id
    /// is `>= id`, wrapping to the lowest node. Without it, the answer is
    /// only a routing step: the successor when `id` falls in
    /// `(self, successor]`, this node when `id` falls in
    /// `(predecessor, self]`, otherwise the closest preceding finger, which
    /// the caller must query in turn.
    pub fn find_successor(&self, id: Id) -> Option<NodeRef> {
        if self.has_full_view() {
            return self.successor_from_all(id).cloned();
        }

        let Some(succ) = self.successor() else {
            return Some(self.local.clone());
        };
        if succ.id == self.local.id {
            return Some(self.local.clone());
        }
        if in_arc_open_closed(id, self.local.id, succ.id) {
            return Some(succ.clone());
        }
        if let Some(pred) = &self.predecessor {
            if in_arc_open_closed(id, pred.id, self.local.id) {
                return Some(self.local.clone());
            }
        }
        match self.closest_preceding(id) {
            closest if closest.id == self.local.id => Some(succ.clone()),
            closest => Some(closest),
        }
    }

    /// Closest known node strictly preceding `id`, falling back to self.
    pub fn closest_preceding(&self, id: Id) -> NodeRef {
        self.fingers
            .closest_preceding(id)
            .cloned()
            .unwrap_or_else(|| self.local.clone())
    }

    fn successor_from_all(&self, id: Id) -> Option<&NodeRef> {
        self.all_nodes
            .iter()
            .find(|n| n.id >= id)
            .or_else(|| self.all_nodes.first())
    }

    /// The replica set for an identifier: the responsible node and the next
    /// `n - 1` distinct nodes clockwise.
    ///
    /// # Algorithm
    ///
    /// 1. Locate the responsible node in the sorted membership list
    /// 2. Walk forward `n` positions, wrapping past the highest id
    ///
    /// # Performance
    /// - **Time**: O(m + n) where m = ring size (linear scan + walk)
    /// - **Space**: O(n) for the returned set
    ///
    /// Requires full membership; returns fewer than `n` entries when the
    /// ring is smaller than `n`.
    pub fn n_successors(&self, id: Id, n: usize) -> Vec<NodeRef> {
        if n == 0 || self.all_nodes.is_empty() {
            return Vec::new();
        }
        let Some(first) = self.successor_from_all(id) else {
            return Vec::new();
        };
        let start = self
            .all_nodes
            .iter()
            .position(|node| node.id == first.id)
            .unwrap_or(0);
        let count = n.min(self.all_nodes.len());
        (0..count)
            .map(|offset| self.all_nodes[(start + offset) % self.all_nodes.len()].clone())
            .collect()
    }

    /// Replace the full membership list, deduplicating by id and re-deriving
    /// the successor pointer.
    pub fn set_all_nodes(&mut self, nodes: Vec<NodeRef>) {
        let mut unique: Vec<NodeRef> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match unique.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => existing.address = node.address,
                None => unique.push(node),
            }
        }
        unique.sort_by_key(|n| n.id);
        self.all_nodes = unique;
        self.refresh_successor_from_all();
    }

    /// Learn about one node (join broadcast). Updates the address of an
    /// already-known id in place.
    pub fn add_node(&mut self, node: NodeRef) {
        if let Some(existing) = self.all_nodes.iter_mut().find(|n| n.id == node.id) {
            existing.address = node.address;
            return;
        }
        self.all_nodes.push(node.clone());
        self.all_nodes.sort_by_key(|n| n.id);

        if node.id == self.local.id {
            return;
        }
        let adopt = match self.successor() {
            None => true,
            Some(succ) => {
                succ.id == self.local.id || in_arc_open(node.id, self.local.id, succ.id)
            }
        };
        if adopt {
            self.set_successor(node);
        }
    }

    /// Forget a node (failure). Returns true if it was known.
    pub fn remove_node(&mut self, node_id: Id) -> bool {
        let before = self.all_nodes.len();
        self.all_nodes.retain(|n| n.id != node_id);
        let removed = self.all_nodes.len() != before;

        if self.successor().is_some_and(|s| s.id == node_id) {
            self.fingers.clear_successor();
            self.refresh_successor_from_all();
        }
        self.fingers.forget(node_id);
        if self.predecessor.as_ref().is_some_and(|p| p.id == node_id) {
            self.predecessor = None;
        }
        self.successor_list.retain(|n| n.id != node_id);
        removed
    }

    fn refresh_successor_from_all(&mut self) {
        let next = self
            .all_nodes
            .iter()
            .find(|n| n.id > self.local.id)
            .or_else(|| self.all_nodes.first())
            .cloned();
        if let Some(node) = next {
            self.set_successor(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeRef {
        NodeRef::new(Id(id), format!("host{id}:5000"))
    }

    fn view_with(local: u64, others: &[u64]) -> RingView {
        let mut view = RingView::new(node(local), KeySpace::new(6).unwrap());
        let mut nodes: Vec<NodeRef> = others.iter().map(|&id| node(id)).collect();
        nodes.push(node(local));
        view.set_all_nodes(nodes);
        view
    }

    #[test]
    fn test_full_view_lookup() {
        let view = view_with(10, &[20, 40, 60]);
        assert_eq!(view.find_successor(Id(15)).unwrap().id, Id(20));
        assert_eq!(view.find_successor(Id(20)).unwrap().id, Id(20));
        assert_eq!(view.find_successor(Id(41)).unwrap().id, Id(60));
        // Wraps past the highest node to the lowest.
        assert_eq!(view.find_successor(Id(61)).unwrap().id, Id(10));
        assert_eq!(view.find_successor(Id(0)).unwrap().id, Id(10));
    }

    #[test]
    fn test_full_view_lookup_minimizes_clockwise_distance() {
        let view = view_with(10, &[20, 40, 60]);
        let space = KeySpace::new(6).unwrap();
        for raw in 0..space.size() {
            let target = Id(raw);
            let chosen = view.find_successor(target).unwrap();
            let dist = |n: &NodeRef| (n.id.0.wrapping_sub(target.0)) & (space.size() - 1);
            let best = view.all_nodes().iter().map(dist).min().unwrap();
            assert_eq!(dist(&chosen), best, "target {target}");
        }
    }

    #[test]
    fn test_finger_routing_without_full_view() {
        let mut view = RingView::new(node(10), KeySpace::new(6).unwrap());
        view.set_successor(node(30));
        view.set_predecessor(node(60));

        // In (self, successor]: route to successor.
        assert_eq!(view.find_successor(Id(25)).unwrap().id, Id(30));
        // In (predecessor, self]: this node is responsible (wrapping arc).
        assert_eq!(view.find_successor(Id(5)).unwrap().id, Id(10));
        // Otherwise the best known hop is the successor itself here.
        assert_eq!(view.find_successor(Id(50)).unwrap().id, Id(30));
    }

    #[test]
    fn test_alone_in_ring() {
        let mut view = RingView::new(node(10), KeySpace::new(6).unwrap());
        assert_eq!(view.find_successor(Id(55)).unwrap().id, Id(10));
        view.set_successor(node(10));
        assert_eq!(view.find_successor(Id(55)).unwrap().id, Id(10));
    }

    #[test]
    fn test_n_successors_contiguous_arc() {
        let view = view_with(10, &[20, 40, 60]);
        let replicas = view.n_successors(Id(15), 3);
        assert_eq!(
            replicas.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![Id(20), Id(40), Id(60)]
        );

        // Wrapping arc starting at the highest node.
        let replicas = view.n_successors(Id(55), 3);
        assert_eq!(
            replicas.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![Id(60), Id(10), Id(20)]
        );
    }

    #[test]
    fn test_n_successors_capped_by_ring_size() {
        let view = view_with(10, &[20]);
        let replicas = view.n_successors(Id(0), 3);
        assert_eq!(replicas.len(), 2);
        let unique: std::collections::HashSet<_> = replicas.iter().map(|n| n.id).collect();
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_set_all_nodes_updates_successor() {
        let view = view_with(40, &[10, 20, 60]);
        assert_eq!(view.successor().unwrap().id, Id(60));

        // Highest node wraps to the lowest.
        let view = view_with(60, &[10, 20, 40]);
        assert_eq!(view.successor().unwrap().id, Id(10));
    }

    #[test]
    fn test_add_node_adopts_closer_successor() {
        let mut view = view_with(10, &[40]);
        assert_eq!(view.successor().unwrap().id, Id(40));
        view.add_node(node(20));
        assert_eq!(view.successor().unwrap().id, Id(20));
        // A farther node does not displace the successor.
        view.add_node(node(35));
        assert_eq!(view.successor().unwrap().id, Id(20));
    }

    #[test]
    fn test_add_node_updates_address_in_place() {
        let mut view = view_with(10, &[20]);
        view.add_node(NodeRef::new(Id(20), "moved:6000"));
        let found = view.all_nodes().iter().find(|n| n.id == Id(20)).unwrap();
        assert_eq!(found.address, "moved:6000");
        assert_eq!(view.all_nodes().len(), 2);
    }

    #[test]
    fn test_remove_node_repairs_pointers() {
        let mut view = view_with(10, &[20, 40]);
        view.set_predecessor(node(40));
        assert!(view.remove_node(Id(20)));
        assert_eq!(view.successor().unwrap().id, Id(40));
        assert!(view.all_nodes().iter().all(|n| n.id != Id(20)));
        assert!(!view.remove_node(Id(20)));

        assert!(view.remove_node(Id(40)));
        assert!(view.predecessor().is_none());
    }
}
