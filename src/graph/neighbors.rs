//! Bounded, deduplicated neighbor lists.
//!
//! A [`NeighborList`] holds at most `k` [`Neighbor`]s, never two for the same
//! node, and only ever trades its current minimum for a strictly better
//! candidate. Every node of a [`KnnGraph`](crate::graph::KnnGraph) owns one.
//!
//! Internally the list is a min-heap on similarity, so iteration order is heap
//! order. Use [`NeighborList::sorted`] when a ranking is needed.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::hash::{Hash, Hasher};

/// Dense index of a node inside a graph arena.
pub type NodeId = usize;

/// An out-edge: target node and the similarity that produced it.
///
/// Two neighbors are equal iff they point at the same node, whatever their
/// score. This is what makes "replace if better" well defined.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub node: NodeId,
    pub similarity: f64,
}

impl Neighbor {
    #[inline]
    pub fn new(node: NodeId, similarity: f64) -> Self {
        Self { node, similarity }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for Neighbor {}

impl Hash for Neighbor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

/// Heap entry: the *least* similar neighbor sits on top.
#[derive(Debug, Clone, Copy)]
struct MinEntry(Neighbor);

impl PartialEq for MinEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MinEntry {}

impl PartialOrd for MinEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // total_cmp keeps the heap well-formed even if a NaN slipped through
        self.0
            .similarity
            .total_cmp(&other.0.similarity)
            .reverse()
            .then_with(|| self.0.node.cmp(&other.0.node))
    }
}

/// Fixed-capacity, similarity-ordered set of neighbors.
#[derive(Debug, Clone)]
pub struct NeighborList {
    capacity: usize,
    heap: BinaryHeap<MinEntry>,
}

impl NeighborList {
    /// Empty list holding at most `capacity` neighbors.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity + 1),
        }
    }

    /// Insert or replace a neighbor.
    ///
    /// - Same node already present: replaced only if the new similarity is
    ///   strictly higher.
    /// - List not full: inserted.
    /// - List full: inserted only if the similarity strictly exceeds the
    ///   current minimum, which is evicted.
    ///
    /// Returns `true` iff the contents changed. NaN similarities are rejected.
    pub fn add(&mut self, neighbor: Neighbor) -> bool {
        if neighbor.similarity.is_nan() {
            return false;
        }

        if let Some(existing) = self.get(neighbor.node) {
            if neighbor.similarity > existing.similarity {
                self.heap.retain(|e| e.0.node != neighbor.node);
                self.heap.push(MinEntry(neighbor));
                return true;
            }
            return false;
        }

        if self.heap.len() < self.capacity {
            self.heap.push(MinEntry(neighbor));
            return true;
        }

        match self.heap.peek() {
            Some(min) if neighbor.similarity > min.0.similarity => {
                self.heap.pop();
                self.heap.push(MinEntry(neighbor));
                true
            }
            _ => false,
        }
    }

    /// Entry for `node`, if present.
    pub fn get(&self, node: NodeId) -> Option<Neighbor> {
        self.heap.iter().find(|e| e.0.node == node).map(|e| e.0)
    }

    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.heap.iter().any(|e| e.0.node == node)
    }

    /// Remove the entry for `node`. Returns `true` if one was removed.
    pub fn remove(&mut self, node: NodeId) -> bool {
        let before = self.heap.len();
        self.heap.retain(|e| e.0.node != node);
        self.heap.len() != before
    }

    /// Keep only the neighbors matching `keep`. Returns how many were dropped.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&Neighbor) -> bool,
    {
        let before = self.heap.len();
        self.heap.retain(|e| keep(&e.0));
        before - self.heap.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Lowest similarity currently held.
    pub fn min_similarity(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.0.similarity)
    }

    /// Neighbors in heap order (not sorted).
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.heap.iter(),
        }
    }

    /// Neighbor node ids in heap order.
    pub fn nodes(&self) -> SmallVec<[NodeId; 16]> {
        self.heap.iter().map(|e| e.0.node).collect()
    }

    /// Neighbors sorted by descending similarity (ties by ascending node id).
    pub fn sorted(&self) -> Vec<Neighbor> {
        let mut out: Vec<Neighbor> = self.iter().copied().collect();
        out.sort_unstable_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.node.cmp(&b.node))
        });
        out
    }

    /// Number of nodes present in both lists.
    ///
    /// Used for quality evaluation against a ground truth, not in hot paths.
    pub fn count_common(&self, other: &NeighborList) -> usize {
        self.iter().filter(|n| other.contains(n.node)).count()
    }

    /// Offer every neighbor of `other` to this list.
    pub fn merge(&mut self, other: NeighborList) -> usize {
        other
            .heap
            .into_iter()
            .filter(|e| self.add(e.0))
            .count()
    }
}

/// Heap-order iterator over a [`NeighborList`].
pub struct Iter<'a> {
    inner: std::collections::binary_heap::Iter<'a, MinEntry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Neighbor;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|e| &e.0)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a NeighborList {
    type Item = &'a Neighbor;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A [`NeighborList`] behind its own lock.
///
/// Used by the threaded builder: workers mutate lists of arbitrary nodes, so
/// the check-evict-insert sequence of [`NeighborList::add`] must be serialized
/// per list. Callers never hold two of these locks at once.
#[derive(Debug)]
pub struct SharedNeighborList {
    inner: Mutex<NeighborList>,
}

impl SharedNeighborList {
    pub fn new(list: NeighborList) -> Self {
        Self {
            inner: Mutex::new(list),
        }
    }

    /// See [`NeighborList::add`].
    #[inline]
    pub fn add(&self, neighbor: Neighbor) -> bool {
        self.inner.lock().add(neighbor)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.inner.lock().contains(node)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot of the neighbor ids.
    pub fn nodes(&self) -> SmallVec<[NodeId; 16]> {
        self.inner.lock().nodes()
    }

    /// Exclusive access without locking (caller holds `&mut`).
    pub fn get_mut(&mut self) -> &mut NeighborList {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> NeighborList {
        self.inner.into_inner()
    }
}
