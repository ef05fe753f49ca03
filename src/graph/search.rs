//! Graph Nearest Neighbor Search (GNNS).
//!
//! Randomized best-first search over a k-nn graph, for arbitrary query values.
//!
//! # Algorithm
//!
//! The similarity budget is `len / speedup` computations. Until it is spent:
//!
//! 1. Pick a random unvisited node as restart point. If its similarity to the
//!    query is below `best_seen / expansion` the restart is rejected.
//! 2. Hill-climb: each step evaluates `long_jumps` random unvisited nodes
//!    (small-world shortcuts) and then the current node's out-neighbors. The
//!    neighbor scan stops at the first improvement; long jumps are all
//!    evaluated. Move to the best improving candidate.
//! 3. No improvement: local optimum. Record it and restart.
//!
//! Every similarity computed along the way is a candidate for the result, not
//! only the walk endpoints.
//!
//! ```text
//! restart ──► hill-climb ──► local optimum ──► restart ...
//!               │  ▲
//!               ▼  │ first improving out-neighbor / best long jump
//! ```
//!
//! When `k >= len` or the budget would reach `len` anyway, the search falls
//! back to an exhaustive scan, parallel on the rayon pool for large graphs.
//! Its result is the brute-force top-k, ties at the cut-off going to the
//! lower node id.
//!
//! # References
//!
//! - Hajebi et al. (2011). "Fast Approximate Nearest-Neighbor Search with
//!   k-Nearest Neighbor Graph." IJCAI.

use crate::error::{KnnError, Result};
use crate::graph::knn::KnnGraph;
use crate::graph::neighbors::{Neighbor, NeighborList, NodeId};
use crate::similarity::Similarity;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Default ratio of brute-force to actual similarity computations.
pub const DEFAULT_SEARCH_SPEEDUP: f64 = 4.0;
/// Default number of random long jumps per hill-climbing step.
pub const DEFAULT_SEARCH_LONG_JUMPS: usize = 2;
/// Default restart acceptance factor.
pub const DEFAULT_SEARCH_EXPANSION: f64 = 1.2;

/// Parallel exhaustive scans split work in chunks of at least this many nodes.
const EXHAUSTIVE_MIN_CHUNK: usize = 1024;

/// Random draws tried before scanning for an unvisited node.
const UNVISITED_REDRAWS: usize = 8;

/// Knobs for [`KnnGraph::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchParams {
    /// Number of neighbors to return.
    pub k: usize,
    /// Target ratio `len / similarities_computed`. Must be > 1.
    pub speedup: f64,
    /// Random jumps evaluated at every hill-climbing step.
    pub long_jumps: usize,
    /// A restart is rejected if its similarity is below `best / expansion`.
    pub expansion: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: crate::nndescent::DEFAULT_K,
            speedup: DEFAULT_SEARCH_SPEEDUP,
            long_jumps: DEFAULT_SEARCH_LONG_JUMPS,
            expansion: DEFAULT_SEARCH_EXPANSION,
        }
    }
}

impl SearchParams {
    /// Defaults with a given `k`.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = speedup;
        self
    }

    pub fn with_long_jumps(mut self, long_jumps: usize) -> Self {
        self.long_jumps = long_jumps;
        self
    }

    pub fn with_expansion(mut self, expansion: f64) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(KnnError::invalid("search k must be at least 1"));
        }
        if !self.speedup.is_finite() || self.speedup <= 1.0 {
            return Err(KnnError::invalid(format!(
                "speedup must be a finite value > 1.0, got {}",
                self.speedup
            )));
        }
        if !self.expansion.is_finite() || self.expansion <= 0.0 {
            return Err(KnnError::invalid(format!(
                "expansion must be a finite value > 0, got {}",
                self.expansion
            )));
        }
        Ok(())
    }
}

/// What a search did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Similarity computations performed.
    pub similarities: usize,
    /// Restart points drawn (accepted or not).
    pub restarts: usize,
    /// Restarts discarded by the expansion rule.
    pub rejected_restarts: usize,
    /// Walks that ended at a local optimum.
    pub local_optima: usize,
    /// The exhaustive fallback was used.
    pub exhaustive: bool,
}

/// Lowest restart similarity still worth walking from.
#[inline]
fn restart_threshold(best: f64, expansion: f64) -> f64 {
    if best >= 0.0 {
        best / expansion
    } else {
        best * expansion
    }
}

/// Best `k` of `scored`, ties broken toward the lower node id.
fn top_k(mut scored: Vec<Neighbor>, k: usize) -> NeighborList {
    scored.retain(|n| !n.similarity.is_nan());
    if k < scored.len() {
        scored.select_nth_unstable_by(k, |a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.node.cmp(&b.node))
        });
        scored.truncate(k);
    }
    let mut result = NeighborList::new(k);
    for n in scored {
        result.add(n);
    }
    result
}

/// Uniformly drawn node not in `visited`, marked visited on return.
///
/// After `UNVISITED_REDRAWS` misses, scans forward from a random offset.
/// `None` only once every node has been visited.
fn draw_unvisited(
    ids: &[NodeId],
    visited: &mut HashSet<NodeId>,
    rng: &mut StdRng,
) -> Option<NodeId> {
    if ids.is_empty() || visited.len() >= ids.len() {
        return None;
    }
    for _ in 0..UNVISITED_REDRAWS {
        let id = ids[rng.random_range(0..ids.len())];
        if visited.insert(id) {
            return Some(id);
        }
    }
    let offset = rng.random_range(0..ids.len());
    let id = ids[offset..]
        .iter()
        .chain(&ids[..offset])
        .copied()
        .find(|id| !visited.contains(id))?;
    visited.insert(id);
    Some(id)
}

impl<K, V, S> KnnGraph<K, V, S>
where
    K: Eq + Hash + Clone + fmt::Debug + Sync,
    V: Sync,
    S: Similarity<V> + Sync,
{
    /// Approximate k most similar nodes to `query`.
    ///
    /// Fails with `InvalidParameter` if `params` do not validate (notably
    /// `speedup <= 1.0`). The result is a bounded list; sort it with
    /// [`NeighborList::sorted`] for a ranking.
    pub fn search(&self, query: &V, params: &SearchParams) -> Result<NeighborList> {
        self.search_with_stats(query, params).map(|(nl, _)| nl)
    }

    /// [`search`](Self::search), also returning what it cost.
    pub fn search_with_stats(
        &self,
        query: &V,
        params: &SearchParams,
    ) -> Result<(NeighborList, SearchStats)> {
        params.validate()?;
        let n = self.len();
        let max_similarities = (n as f64 / params.speedup) as usize;

        if params.k >= n || max_similarities >= n {
            let result = self.search_exhaustive(query, params.k)?;
            let stats = SearchStats {
                similarities: n,
                exhaustive: true,
                ..SearchStats::default()
            };
            return Ok((result, stats));
        }

        let mut rng = self.rng();
        Ok(self.gnns(query, params, max_similarities, &mut rng))
    }

    /// Exact top-`k` by scanning every node.
    ///
    /// Graphs of at least `EXHAUSTIVE_MIN_CHUNK` nodes are scanned on the
    /// current rayon pool; run the call inside `ThreadPool::install` to choose
    /// the pool. Ties at the cut-off go to the lower node id, so the result
    /// does not depend on how the scan was split. A panic in the similarity
    /// provider is returned as `WorkerFailure { round: 0 }`.
    pub fn search_exhaustive(&self, query: &V, k: usize) -> Result<NeighborList> {
        let ids = self.ids();
        let score = |&id: &NodeId| {
            self.value_of(id)
                .map(|v| Neighbor::new(id, self.similarity().similarity(query, v)))
        };
        let scored: Vec<Neighbor> = catch_unwind(AssertUnwindSafe(|| {
            if ids.len() < EXHAUSTIVE_MIN_CHUNK {
                ids.iter().filter_map(score).collect()
            } else {
                ids.par_iter()
                    .with_min_len(EXHAUSTIVE_MIN_CHUNK)
                    .filter_map(score)
                    .collect()
            }
        }))
        .map_err(|payload| KnnError::from_panic(0, payload))?;
        Ok(top_k(scored, k))
    }

    fn gnns(
        &self,
        query: &V,
        params: &SearchParams,
        max_similarities: usize,
        rng: &mut StdRng,
    ) -> (NeighborList, SearchStats) {
        let ids = self.ids();
        let mut stats = SearchStats::default();

        // Every computed similarity, in computation order
        let mut computed: Vec<Neighbor> = Vec::with_capacity(max_similarities);
        let mut visited: HashSet<NodeId> = HashSet::with_capacity(max_similarities * 2);
        let mut global_best = f64::NEG_INFINITY;

        let evaluate = |id: NodeId, computed: &mut Vec<Neighbor>| -> Option<f64> {
            let value = self.value_of(id)?;
            let s = self.similarity().similarity(query, value);
            computed.push(Neighbor::new(id, s));
            Some(s)
        };

        'restarts: while computed.len() < max_similarities {
            let Some(start) = draw_unvisited(ids, &mut visited, rng) else {
                break;
            };
            stats.restarts += 1;

            let Some(start_sim) = evaluate(start, &mut computed) else {
                continue;
            };
            if start_sim < restart_threshold(global_best, params.expansion) {
                stats.rejected_restarts += 1;
                continue;
            }

            let mut current = start;
            let mut best = start_sim;

            loop {
                let mut next = None;

                for _ in 0..params.long_jumps {
                    if computed.len() >= max_similarities {
                        break 'restarts;
                    }
                    let Some(other) = draw_unvisited(ids, &mut visited, rng) else {
                        break 'restarts;
                    };
                    if let Some(s) = evaluate(other, &mut computed) {
                        if s > best {
                            best = s;
                            next = Some(other);
                        }
                    }
                }

                if let Some(list) = self.neighbors_of(current) {
                    for nb in list.iter() {
                        if computed.len() >= max_similarities {
                            break 'restarts;
                        }
                        if !visited.insert(nb.node) {
                            continue;
                        }
                        if let Some(s) = evaluate(nb.node, &mut computed) {
                            if s > best {
                                best = s;
                                next = Some(nb.node);
                                break;
                            }
                        }
                    }
                }

                match next {
                    Some(id) => current = id,
                    None => {
                        stats.local_optima += 1;
                        if best > global_best {
                            global_best = best;
                        }
                        trace!(restart = stats.restarts, best, "gnns local optimum");
                        break;
                    }
                }
            }
        }

        stats.similarities = computed.len();
        let mut result = NeighborList::new(params.k);
        for n in computed {
            result.add(n);
        }
        (result, stats)
    }
}
