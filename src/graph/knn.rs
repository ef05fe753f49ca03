//! The k-nn graph: node arena, key index and per-node neighbor lists.

use crate::error::{KnnError, Result};
use crate::graph::neighbors::{Neighbor, NeighborList, NodeId};
use crate::graph::online::OnlineParams;
use crate::progress::ProgressCallback;
use crate::similarity::Similarity;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// A graph node: identity key plus the value the similarity provider reads.
///
/// Node equality is by key only; the graph never compares values.
#[derive(Debug, Clone)]
pub struct Node<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Node<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

struct Slot<K, V> {
    node: Node<K, V>,
    neighbors: NeighborList,
    sequence: u64,
    /// Position in `KnnGraph::live`.
    live_pos: usize,
}

/// Directed k-nn graph over an arbitrary similarity.
///
/// Nodes live in an arena and are addressed by dense [`NodeId`]s; the key
/// index maps identities to ids. Freed ids are recycled, so an id is only
/// meaningful while its node is present.
///
/// Invariants:
/// - every present node owns a [`NeighborList`] of capacity `k`
/// - no node has an edge to itself
/// - every edge points at a present node
pub struct KnnGraph<K, V, S> {
    k: usize,
    similarity: S,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<NodeId>,
    live: Vec<NodeId>,
    index: HashMap<K, NodeId>,
    /// Insertion order side table (sequence -> node), oldest first.
    by_sequence: BTreeMap<u64, NodeId>,
    next_sequence: u64,
    pub(super) online: OnlineParams,
    seed: Option<u64>,
    rng_stream: AtomicU64,
    pub(super) progress: Option<ProgressCallback>,
}

impl<K, V, S> KnnGraph<K, V, S>
where
    K: Eq + Hash + Clone + fmt::Debug,
    S: Similarity<V>,
{
    /// Empty graph with out-degree bound `k`.
    pub fn new(k: usize, similarity: S) -> Result<Self> {
        if k == 0 {
            return Err(KnnError::invalid("k must be at least 1"));
        }
        Ok(Self {
            k,
            similarity,
            slots: Vec::new(),
            free: Vec::new(),
            live: Vec::new(),
            index: HashMap::new(),
            by_sequence: BTreeMap::new(),
            next_sequence: 0,
            online: OnlineParams::default(),
            seed: None,
            rng_stream: AtomicU64::new(0),
            progress: None,
        })
    }

    /// Assemble a graph from builder output. `nodes[i]` owns `lists[i]`.
    ///
    /// Keys must already be unique; builders check that before doing any work.
    pub(crate) fn from_parts(
        k: usize,
        similarity: S,
        nodes: Vec<Node<K, V>>,
        lists: Vec<NeighborList>,
        seed: Option<u64>,
    ) -> Result<Self> {
        debug_assert_eq!(nodes.len(), lists.len());
        let mut graph = Self::new(k, similarity)?;
        graph.seed = seed;
        graph.slots.reserve(nodes.len());
        for (node, neighbors) in nodes.into_iter().zip(lists) {
            graph.insert_slot(node, neighbors)?;
        }
        Ok(graph)
    }

    /// Make search and maintenance reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng_stream.store(0, Ordering::Relaxed);
        self
    }

    /// Install an observer for maintenance checkpoints.
    pub fn set_progress(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn similarity(&self) -> &S {
        &self.similarity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn id_of(&self, key: &K) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.slot(id).map(|s| &s.node)
    }

    pub fn key_of(&self, id: NodeId) -> Option<&K> {
        self.node(id).map(|n| &n.key)
    }

    pub fn value(&self, key: &K) -> Option<&V> {
        self.id_of(key).and_then(|id| self.node(id)).map(|n| &n.value)
    }

    /// Out-edges of `key`.
    pub fn neighbors(&self, key: &K) -> Option<&NeighborList> {
        self.id_of(key).and_then(|id| self.neighbors_of(id))
    }

    pub fn neighbors_of(&self, id: NodeId) -> Option<&NeighborList> {
        self.slot(id).map(|s| &s.neighbors)
    }

    /// Insertion sequence number of `key` (0-based, increasing).
    pub fn sequence_of(&self, key: &K) -> Option<u64> {
        self.id_of(key).and_then(|id| self.slot(id)).map(|s| s.sequence)
    }

    /// Ids of all present nodes, in arbitrary order.
    pub fn ids(&self) -> &[NodeId] {
        &self.live
    }

    /// All present nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<K, V>> + '_ {
        self.live.iter().filter_map(move |&id| self.node(id))
    }

    /// `(key, out-edges)` for every node.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &NeighborList)> + '_ {
        self.live
            .iter()
            .filter_map(move |&id| self.slot(id))
            .map(|s| (&s.node.key, &s.neighbors))
    }

    /// Total number of directed edges.
    pub fn edge_count(&self) -> usize {
        self.iter().map(|(_, nl)| nl.len()).sum()
    }

    /// Insert a node with precomputed out-edges, as is.
    ///
    /// No other list is updated: use [`fast_add`](Self::fast_add) to let
    /// existing nodes discover the newcomer. `neighbors` must have capacity
    /// `k` and point only at present nodes.
    pub fn add(&mut self, node: Node<K, V>, neighbors: NeighborList) -> Result<NodeId> {
        if self.contains(&node.key) {
            return Err(KnnError::duplicate(&node.key));
        }
        if neighbors.capacity() != self.k {
            return Err(KnnError::invalid(format!(
                "neighbor list capacity {} does not match k = {}",
                neighbors.capacity(),
                self.k
            )));
        }
        if let Some(n) = neighbors.iter().find(|n| self.slot(n.node).is_none()) {
            return Err(KnnError::invalid(format!(
                "neighbor {} is not in the graph",
                n.node
            )));
        }
        self.insert_slot(node, neighbors)
    }

    /// Remove every edge whose similarity is below `threshold`.
    ///
    /// Returns the number of edges removed.
    pub fn prune(&mut self, threshold: f64) -> usize {
        self.slots
            .iter_mut()
            .flatten()
            .map(|s| s.neighbors.retain(|n| n.similarity >= threshold))
            .sum()
    }

    /// Number of edges this graph shares with `other` (matched by key).
    ///
    /// With `other` an exact k-nn graph over the same nodes this is the
    /// number of correct edges; divide by `len() * k` for edge recall.
    pub fn compare<S2>(&self, other: &KnnGraph<K, V, S2>) -> usize
    where
        S2: Similarity<V>,
    {
        let mut common = 0;
        for (key, list) in self.iter() {
            let Some(theirs) = other.neighbors(key) else {
                continue;
            };
            common += list
                .iter()
                .filter_map(|n| self.key_of(n.node))
                .filter_map(|k| other.id_of(k))
                .filter(|&id| theirs.contains(id))
                .count();
        }
        common
    }

    // --- crate internals ---------------------------------------------------

    #[inline]
    fn slot(&self, id: NodeId) -> Option<&Slot<K, V>> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    #[inline]
    pub(super) fn neighbors_mut(&mut self, id: NodeId) -> Option<&mut NeighborList> {
        self.slots
            .get_mut(id)
            .and_then(|s| s.as_mut())
            .map(|s| &mut s.neighbors)
    }

    #[inline]
    pub(super) fn value_of(&self, id: NodeId) -> Option<&V> {
        self.slot(id).map(|s| &s.node.value)
    }

    /// Similarity between two present nodes.
    #[inline]
    pub(super) fn sim_ids(&self, a: NodeId, b: NodeId) -> Option<f64> {
        Some(
            self.similarity
                .similarity(self.value_of(a)?, self.value_of(b)?),
        )
    }

    /// Id the next inserted node will get.
    pub(super) fn next_id(&self) -> NodeId {
        self.free.last().copied().unwrap_or(self.slots.len())
    }

    /// Place a node and its out-edges, assigning the next sequence number.
    pub(super) fn insert_slot(
        &mut self,
        node: Node<K, V>,
        neighbors: NeighborList,
    ) -> Result<NodeId> {
        if self.index.contains_key(&node.key) {
            return Err(KnnError::duplicate(&node.key));
        }
        let id = self.next_id();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.index.insert(node.key.clone(), id);
        self.by_sequence.insert(sequence, id);
        let slot = Slot {
            node,
            neighbors,
            sequence,
            live_pos: self.live.len(),
        };
        self.live.push(id);
        if id == self.slots.len() {
            self.slots.push(Some(slot));
        } else {
            self.free.pop();
            self.slots[id] = Some(slot);
        }
        Ok(id)
    }

    /// Drop a node's slot. Edges pointing at it must already be gone.
    pub(super) fn remove_slot(&mut self, id: NodeId) -> Option<Node<K, V>> {
        let slot = self.slots.get_mut(id)?.take()?;
        self.index.remove(&slot.node.key);
        self.by_sequence.remove(&slot.sequence);

        let last = self.live.len() - 1;
        self.live.swap_remove(slot.live_pos);
        if slot.live_pos != last {
            let moved = self.live[slot.live_pos];
            if let Some(s) = self.slots[moved].as_mut() {
                s.live_pos = slot.live_pos;
            }
        }
        self.free.push(id);
        Some(slot.node)
    }

    /// Node with the smallest sequence number.
    pub(super) fn oldest(&self) -> Option<NodeId> {
        self.by_sequence.values().next().copied()
    }

    /// Fresh random source for one search or maintenance call.
    pub(super) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let stream = self.rng_stream.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }

    /// Edges of `id` as a new list, for callers that mutate while reading.
    pub(super) fn neighbor_ids(&self, id: NodeId) -> smallvec::SmallVec<[NodeId; 16]> {
        self.neighbors_of(id).map(|nl| nl.nodes()).unwrap_or_default()
    }

    /// Offer `neighbor` to `id`'s list, refusing self-edges.
    pub(super) fn offer(&mut self, id: NodeId, neighbor: Neighbor) -> bool {
        if id == neighbor.node {
            return false;
        }
        self.neighbors_mut(id).is_some_and(|nl| nl.add(neighbor))
    }
}

impl<K: fmt::Debug, V, S> fmt::Debug for KnnGraph<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnnGraph")
            .field("k", &self.k)
            .field("len", &self.live.len())
            .field("online", &self.online)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::inverse_abs_difference;

    type IntGraph = KnnGraph<u32, i64, fn(&i64, &i64) -> f64>;

    fn line(n: u32, k: usize) -> IntGraph {
        let mut g: IntGraph = IntGraph::new(k, inverse_abs_difference).unwrap();
        for i in 0..n {
            g.insert_slot(Node::new(i, i as i64), NeighborList::new(k))
                .unwrap();
        }
        for a in 0..n as usize {
            for b in 0..n as usize {
                let s = g.sim_ids(a, b).unwrap();
                g.offer(a, Neighbor::new(b, s));
            }
        }
        g
    }

    #[test]
    fn test_zero_k_rejected() {
        let err = IntGraph::new(0, inverse_abs_difference).unwrap_err();
        assert!(matches!(err, KnnError::InvalidParameter(_)));
    }

    #[test]
    fn test_insert_and_lookup() {
        let g = line(5, 2);
        assert_eq!(g.len(), 5);
        assert!(g.contains(&3));
        assert_eq!(g.value(&3), Some(&3));
        assert_eq!(g.key_of(g.id_of(&4).unwrap()), Some(&4));
        assert_eq!(g.sequence_of(&0), Some(0));
        assert_eq!(g.sequence_of(&4), Some(4));
        assert_eq!(g.edge_count(), 10);
    }

    #[test]
    fn test_no_self_edges() {
        let g = line(6, 3);
        for (key, list) in g.iter() {
            let id = g.id_of(key).unwrap();
            assert!(!list.contains(id));
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut g = line(3, 2);
        let err = g
            .insert_slot(Node::new(1, 99), NeighborList::new(2))
            .unwrap_err();
        assert!(matches!(err, KnnError::DuplicateNode(_)));
        assert_eq!(g.len(), 3);
        assert_eq!(g.value(&1), Some(&1));
    }

    #[test]
    fn test_remove_slot_recycles_id() {
        let mut g = line(4, 2);
        let id = g.id_of(&1).unwrap();
        // Detach edges first, as fast_remove does
        for other in g.ids().to_vec() {
            g.neighbors_mut(other).unwrap().remove(id);
        }
        let node = g.remove_slot(id).unwrap();
        assert_eq!(node.key, 1);
        assert_eq!(g.len(), 3);
        assert!(!g.contains(&1));
        assert_eq!(g.oldest(), g.id_of(&0));

        let new_id = g
            .insert_slot(Node::new(10, 10), NeighborList::new(2))
            .unwrap();
        assert_eq!(new_id, id);
        assert_eq!(g.sequence_of(&10), Some(4));
        assert_eq!(g.nodes().count(), 4);
    }

    #[test]
    fn test_add_validates_edges() {
        let mut g = line(3, 2);
        let mut list = NeighborList::new(2);
        list.add(Neighbor::new(0, 0.2));
        list.add(Neighbor::new(2, 0.5));
        let id = g.add(Node::new(7, 4), list.clone()).unwrap();
        assert_eq!(g.neighbors(&7).unwrap().len(), 2);
        assert_eq!(g.id_of(&7), Some(id));

        let err = g.add(Node::new(8, 5), NeighborList::new(3)).unwrap_err();
        assert!(matches!(err, KnnError::InvalidParameter(_)));

        let mut dangling = NeighborList::new(2);
        dangling.add(Neighbor::new(42, 0.1));
        let err = g.add(Node::new(8, 5), dangling).unwrap_err();
        assert!(matches!(err, KnnError::InvalidParameter(_)));

        let err = g.add(Node::new(7, 4), list).unwrap_err();
        assert!(matches!(err, KnnError::DuplicateNode(_)));
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn test_prune_below_threshold() {
        let mut g = line(10, 4);
        // Neighbors at distance 1 have similarity 0.5, distance 2 -> 1/3
        let removed = g.prune(0.5);
        assert!(removed > 0);
        for (_, list) in g.iter() {
            assert!(list.iter().all(|n| n.similarity >= 0.5));
            assert!(list.len() <= 2);
        }
    }

    #[test]
    fn test_compare_identical_graphs() {
        let a = line(8, 3);
        let b = line(8, 3);
        assert_eq!(a.compare(&b), a.edge_count());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        use rand::Rng;
        let a = line(3, 1).with_seed(7);
        let b = line(3, 1).with_seed(7);
        let x: u64 = a.rng().random();
        let y: u64 = b.rng().random();
        assert_eq!(x, y);
        // Successive calls draw from different streams
        let z: u64 = a.rng().random();
        assert_ne!(x, z);
    }
}
