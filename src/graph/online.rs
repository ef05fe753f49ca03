//! Online maintenance: approximate insert, approximate remove, sliding window.
//!
//! Rebuilding a k-nn graph for every change costs a full NNDescent run. The
//! operations here touch only the neighborhood of the changed node.
//!
//! # Insert (`fast_add`)
//!
//! 1. Assign the next insertion sequence number.
//! 2. With a window configured, evict the oldest nodes until there is room.
//! 3. GNNS search for the newcomer's neighbors (budget `len / speedup`).
//! 4. Propagate: breadth-first from those neighbors, `update_depth` levels
//!    deep, offer the newcomer to every node reached. Search alone can only
//!    find the newcomer's neighbors, not the nodes for which the newcomer is
//!    a neighbor.
//! 5. Insert the node with its list.
//!
//! # Remove (`fast_remove`)
//!
//! 1. Drop every edge pointing at the node, remembering the affected nodes.
//! 2. Collect replacement candidates breadth-first (`update_depth` levels)
//!    from the removed node and the affected nodes, over the current edges.
//! 3. Offer every candidate to every affected node.
//! 4. Delete the node.
//!
//! Step 3 is bounded-list insertion, so most candidates are rejected; what
//! survives refills the lists the removal left short.
//!
//! # Cost
//!
//! | Operation | Similarities |
//! |-----------|--------------|
//! | `fast_add` | `len / speedup` + nodes reached by propagation |
//! | `fast_remove` | affected × candidates |
//! | rebuild | NNDescent, several × `len · k` |

use crate::error::{KnnError, Result};
use crate::graph::knn::{KnnGraph, Node};
use crate::graph::neighbors::{Neighbor, NodeId};
use crate::graph::search::SearchParams;
use crate::progress::{report, Phase, ProgressEvent};
use crate::similarity::Similarity;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Default breadth-first depth of insert propagation and remove repair.
pub const DEFAULT_UPDATE_DEPTH: usize = 3;

/// Configuration of online maintenance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OnlineParams {
    /// Search knobs used by `fast_add`. `k` is always the graph's own `k`;
    /// `speedup` is given per call.
    pub search: SearchParams,
    /// Levels of breadth-first propagation / repair.
    pub update_depth: usize,
    /// Maximum number of nodes kept; the oldest are evicted on insert.
    pub window: Option<usize>,
}

impl Default for OnlineParams {
    fn default() -> Self {
        Self {
            search: SearchParams::default(),
            update_depth: DEFAULT_UPDATE_DEPTH,
            window: None,
        }
    }
}

impl OnlineParams {
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        if self.window == Some(0) {
            return Err(KnnError::invalid("window must hold at least one node"));
        }
        Ok(())
    }
}

/// Cost breakdown of one `fast_add`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    /// Similarities computed by the neighbor search.
    pub search_similarities: usize,
    /// Similarities computed while propagating the newcomer.
    pub update_similarities: usize,
    /// Existing lists that accepted the newcomer.
    pub updated_nodes: usize,
    /// Nodes evicted by the window.
    pub evicted: usize,
    /// Similarities spent repairing after evictions.
    pub eviction_similarities: usize,
}

impl InsertStats {
    pub fn total_similarities(&self) -> usize {
        self.search_similarities + self.update_similarities + self.eviction_similarities
    }
}

/// Cost breakdown of one `fast_remove`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveStats {
    /// Nodes that had an edge to the removed node.
    pub affected: usize,
    /// Size of the replacement candidate pool.
    pub candidates: usize,
    /// Similarities computed during repair.
    pub similarities: usize,
    /// Replacement edges accepted.
    pub edges_added: usize,
}

impl<K, V, S> KnnGraph<K, V, S>
where
    K: Eq + Hash + Clone + fmt::Debug + Sync,
    V: Sync,
    S: Similarity<V> + Sync,
{
    pub fn online_params(&self) -> &OnlineParams {
        &self.online
    }

    pub fn set_online_params(&mut self, params: OnlineParams) -> Result<()> {
        params.validate()?;
        self.online = params;
        Ok(())
    }

    /// Keep at most `window` nodes; `None` disables eviction.
    ///
    /// Takes effect on the next insert.
    pub fn set_window(&mut self, window: Option<usize>) -> Result<()> {
        if window == Some(0) {
            return Err(KnnError::invalid("window must hold at least one node"));
        }
        self.online.window = window;
        Ok(())
    }

    pub fn window(&self) -> Option<usize> {
        self.online.window
    }

    pub fn set_update_depth(&mut self, depth: usize) {
        self.online.update_depth = depth;
    }

    pub fn update_depth(&self) -> usize {
        self.online.update_depth
    }

    /// Insert a node approximately. Returns the similarities computed.
    ///
    /// Fails with `DuplicateNode` if the key is present and with
    /// `InvalidParameter` if `speedup <= 1.0`; the graph is untouched then.
    pub fn fast_add(&mut self, key: K, value: V, speedup: f64) -> Result<usize> {
        self.fast_add_with_stats(key, value, speedup)
            .map(|s| s.total_similarities())
    }

    /// [`fast_add`](Self::fast_add) with a cost breakdown.
    pub fn fast_add_with_stats(&mut self, key: K, value: V, speedup: f64) -> Result<InsertStats> {
        if self.contains(&key) {
            return Err(KnnError::duplicate(&key));
        }
        let params = SearchParams {
            k: self.k(),
            speedup,
            ..self.online.search
        };
        params.validate()?;

        let mut stats = InsertStats::default();

        if let Some(window) = self.online.window {
            while self.len() >= window {
                let Some(oldest) = self.oldest() else {
                    break;
                };
                let removed = self.remove_id(oldest);
                stats.evicted += 1;
                stats.eviction_similarities += removed.similarities;
            }
        }

        let (neighbors, search) = self.search_with_stats(&value, &params)?;
        stats.search_similarities = search.similarities;
        report(
            &self.progress,
            ProgressEvent {
                phase: Phase::Insert,
                iteration: 1,
                updates: neighbors.len(),
                similarities: stats.search_similarities + stats.eviction_similarities,
            },
        );

        // Edges to the newcomer point at the id it is about to get
        let new_id = self.next_id();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut frontier: Vec<NodeId> = neighbors.iter().map(|n| n.node).collect();

        for _ in 0..self.online.update_depth {
            let mut next = Vec::new();
            for other in frontier.drain(..) {
                if !visited.insert(other) {
                    continue;
                }
                next.extend(
                    self.neighbor_ids(other)
                        .into_iter()
                        .filter(|nb| !visited.contains(nb)),
                );
                let Some(other_value) = self.value_of(other) else {
                    continue;
                };
                let s = self.similarity().similarity(&value, other_value);
                stats.update_similarities += 1;
                if self.offer(other, Neighbor::new(new_id, s)) {
                    stats.updated_nodes += 1;
                }
            }
            frontier = next;
        }

        let id = self.insert_slot(Node::new(key, value), neighbors)?;
        debug_assert_eq!(id, new_id);

        report(
            &self.progress,
            ProgressEvent {
                phase: Phase::Insert,
                iteration: 2,
                updates: stats.updated_nodes,
                similarities: stats.total_similarities(),
            },
        );
        trace!(
            id,
            search = stats.search_similarities,
            update = stats.update_similarities,
            evicted = stats.evicted,
            "fast_add"
        );
        Ok(stats)
    }

    /// Remove a node and repair the lists that pointed at it.
    ///
    /// Returns the similarities computed. Fails with `NotFound` for an
    /// unknown key.
    pub fn fast_remove(&mut self, key: &K) -> Result<usize> {
        self.fast_remove_with_stats(key).map(|s| s.similarities)
    }

    /// [`fast_remove`](Self::fast_remove) with a cost breakdown.
    pub fn fast_remove_with_stats(&mut self, key: &K) -> Result<RemoveStats> {
        let id = self.id_of(key).ok_or_else(|| KnnError::not_found(key))?;
        Ok(self.remove_id(id))
    }

    fn remove_id(&mut self, id: NodeId) -> RemoveStats {
        let mut stats = RemoveStats::default();

        let mut affected: Vec<NodeId> = Vec::new();
        for other in self.ids().to_vec() {
            if other == id {
                continue;
            }
            if self.neighbors_mut(other).is_some_and(|nl| nl.remove(id)) {
                affected.push(other);
            }
        }
        stats.affected = affected.len();

        // Candidate pool over the current edges, including the removed
        // node's own list
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut pool: Vec<NodeId> = Vec::new();
        let mut frontier: Vec<NodeId> = Vec::with_capacity(affected.len() + 1);
        frontier.push(id);
        frontier.extend(affected.iter().copied());
        for &start in &frontier {
            if seen.insert(start) {
                pool.push(start);
            }
        }
        for _ in 0..self.online.update_depth {
            let mut next = Vec::new();
            for node in frontier.drain(..) {
                for nb in self.neighbor_ids(node) {
                    if seen.insert(nb) {
                        pool.push(nb);
                        next.push(nb);
                    }
                }
            }
            frontier = next;
        }
        pool.retain(|&c| c != id);
        stats.candidates = pool.len();

        for &target in &affected {
            for &candidate in &pool {
                if candidate == target
                    || self
                        .neighbors_of(target)
                        .is_some_and(|nl| nl.contains(candidate))
                {
                    continue;
                }
                let Some(s) = self.sim_ids(target, candidate) else {
                    continue;
                };
                stats.similarities += 1;
                if self.offer(target, Neighbor::new(candidate, s)) {
                    stats.edges_added += 1;
                }
            }
        }

        self.remove_slot(id);

        report(
            &self.progress,
            ProgressEvent {
                phase: Phase::Remove,
                iteration: 1,
                updates: stats.edges_added,
                similarities: stats.similarities,
            },
        );
        trace!(
            id,
            affected = stats.affected,
            candidates = stats.candidates,
            similarities = stats.similarities,
            "fast_remove"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::exact_knn_graph;
    use crate::progress::ProgressCallback;
    use crate::similarity::inverse_abs_difference;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type IntGraph = KnnGraph<u32, i64, fn(&i64, &i64) -> f64>;

    fn exact_line(n: u32, k: usize) -> IntGraph {
        let nodes: Vec<Node<u32, i64>> = (0..n).map(|i| Node::new(i, 2 * i as i64)).collect();
        exact_knn_graph(nodes, k, inverse_abs_difference as fn(&i64, &i64) -> f64)
            .unwrap()
            .with_seed(5)
    }

    fn assert_no_dangling(g: &IntGraph) {
        for (key, list) in g.iter() {
            let own = g.id_of(key).unwrap();
            for n in list.iter() {
                assert_ne!(n.node, own, "self edge on {key}");
                assert!(g.node(n.node).is_some(), "dangling edge from {key}");
            }
        }
    }

    #[test]
    fn test_fast_add_into_empty_graph() {
        let mut g: IntGraph = IntGraph::new(3, inverse_abs_difference).unwrap();
        assert_eq!(g.fast_add(0, 0, 4.0).unwrap(), 0);
        g.fast_add(1, 10, 4.0).unwrap();
        g.fast_add(2, 20, 4.0).unwrap();
        assert_eq!(g.len(), 3);
        // Small graphs stay complete
        for (_, list) in g.iter() {
            assert_eq!(list.len(), 2);
        }
        assert_no_dangling(&g);
    }

    #[test]
    fn test_fast_add_duplicate_leaves_graph_unchanged() {
        let mut g = exact_line(50, 5);
        let edges = g.edge_count();
        let err = g.fast_add(10, 999, 4.0).unwrap_err();
        assert!(matches!(err, KnnError::DuplicateNode(_)));
        assert_eq!(g.len(), 50);
        assert_eq!(g.edge_count(), edges);
        assert_eq!(g.value(&10), Some(&20));
    }

    #[test]
    fn test_fast_add_rejects_bad_speedup() {
        let mut g = exact_line(50, 5);
        let err = g.fast_add(1000, 1, 1.0).unwrap_err();
        assert!(matches!(err, KnnError::InvalidParameter(_)));
        assert!(!g.contains(&1000));
    }

    #[test]
    fn test_fast_add_updates_existing_lists() {
        let mut g = exact_line(400, 10);
        // 401 sits between 400 (key 200) and 402 (key 201)
        let stats = g.fast_add_with_stats(10_000, 401, 2.0).unwrap();
        assert!(stats.search_similarities > 0);
        assert!(stats.update_similarities > 0);
        assert!(stats.updated_nodes > 0);

        let new_id = g.id_of(&10_000).unwrap();
        let left = g.neighbors(&200).unwrap();
        let right = g.neighbors(&201).unwrap();
        assert!(left.contains(new_id) || right.contains(new_id));
        assert_no_dangling(&g);
    }

    #[test]
    fn test_fast_remove_unknown_key() {
        let mut g = exact_line(20, 4);
        let err = g.fast_remove(&77).unwrap_err();
        assert!(matches!(err, KnnError::NotFound(_)));
    }

    #[test]
    fn test_fast_remove_repairs_lists() {
        let mut g = exact_line(200, 8);
        let victim_id = g.id_of(&100).unwrap();
        let stats = g.fast_remove_with_stats(&100).unwrap();
        assert_eq!(stats.affected, 8);
        assert!(stats.similarities > 0);
        assert!(!g.contains(&100));
        assert_eq!(g.len(), 199);
        for (_, list) in g.iter() {
            assert!(!list.contains(victim_id));
            assert_eq!(list.len(), 8);
        }
        assert_no_dangling(&g);
    }

    #[test]
    fn test_remove_down_to_small_graph() {
        let mut g = exact_line(6, 4);
        g.fast_remove(&0).unwrap();
        g.fast_remove(&5).unwrap();
        assert_eq!(g.len(), 4);
        for (_, list) in g.iter() {
            assert_eq!(list.len(), 3);
        }
        assert_no_dangling(&g);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut g = IntGraph::new(4, inverse_abs_difference).unwrap().with_seed(1);
        g.set_window(Some(30)).unwrap();
        for i in 0..100u32 {
            g.fast_add(i, i as i64, 4.0).unwrap();
            assert!(g.len() <= 30);
        }
        assert_eq!(g.len(), 30);
        assert!(!g.contains(&69));
        assert!(g.contains(&70));
        assert_eq!(g.sequence_of(&99), Some(99));
        assert_no_dangling(&g);
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut g = exact_line(10, 3);
        assert!(g.set_window(Some(0)).is_err());
        assert_eq!(g.window(), None);
        let params = OnlineParams {
            window: Some(0),
            ..OnlineParams::default()
        };
        assert!(g.set_online_params(params).is_err());
    }

    #[test]
    fn test_update_depth_zero_skips_propagation() {
        let mut g = exact_line(300, 6);
        g.set_update_depth(0);
        let stats = g.fast_add_with_stats(5000, 301, 4.0).unwrap();
        assert_eq!(stats.update_similarities, 0);
        assert_eq!(stats.updated_nodes, 0);
        assert_eq!(g.neighbors(&5000).unwrap().len(), 6);
    }

    #[test]
    fn test_propagation_visits_each_node_once() {
        let mut g = exact_line(300, 6);
        let stats = g.fast_add_with_stats(5000, 301, 4.0).unwrap();
        // Nodes reachable in 3 hops from a 1-D neighborhood are bounded
        assert!(stats.update_similarities <= 300);
    }

    #[test]
    fn test_progress_checkpoints() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut g = exact_line(100, 5);
        g.set_progress(Some(ProgressCallback::new(move |e| sink.lock().push(*e))));

        g.fast_add(1000, 51, 4.0).unwrap();
        g.fast_remove(&3).unwrap();

        let events = events.lock();
        let phases: Vec<Phase> = events.iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![Phase::Insert, Phase::Insert, Phase::Remove]);
        assert!(events[1].similarities >= events[0].similarities);
    }
}
