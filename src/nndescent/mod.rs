//! NNDescent: k-nn graph construction by iterative local refinement.
//!
//! "A neighbor of a neighbor is likely a neighbor." Every node starts with
//! `k` random neighbors; each round compares the neighbors of every node with
//! each other and keeps what improves a list. Rounds stop once fewer than
//! `delta * n * k` list updates happen.
//!
//! # One round
//!
//! ```text
//! for v:   old[v] = processed neighbors
//!          new[v] = sample(unprocessed neighbors, rho*k), mark processed
//! reverse: old'[v], new'[v] = nodes listing v in their old / new picks
//! for v:   old[v] |= sample(old'[v], rho*k); new[v] |= sample(new'[v], rho*k)
//! join:    sim(u1, u2) for u1,u2 in new[v] x new[v] and new[v] x old[v];
//!          offer the result to both lists, count successes (c)
//! stop:    c <= delta * n * k, or max_iterations reached
//! ```
//!
//! Only pairs involving at least one new neighbor are joined, so a pair
//! compared in an earlier round is not recomputed unless one side re-entered
//! a list.
//!
//! Inputs with `n <= k + 1` skip the rounds and get the complete graph.
//!
//! Two builders share this machinery: [`NNDescent`] runs the join on the
//! calling thread, [`ThreadedNNDescent`] splits it over a rayon pool.
//!
//! # References
//!
//! - Dong, Charikar, Li (2011). "Efficient K-Nearest Neighbor Graph
//!   Construction for Generic Similarity Measures." WWW.

mod sequential;
mod threaded;

pub use sequential::NNDescent;
pub use threaded::ThreadedNNDescent;

use crate::error::{KnnError, Result};
use crate::graph::knn::{KnnGraph, Node};
use crate::graph::neighbors::{Neighbor, NeighborList, NodeId};
use crate::similarity::Similarity;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::ops::AddAssign;
use tracing::{debug, info, warn};

/// Default number of neighbors per node.
pub const DEFAULT_K: usize = 10;
/// Default sampling fraction.
pub const DEFAULT_RHO: f64 = 0.5;
/// Default early-termination fraction.
pub const DEFAULT_DELTA: f64 = 0.001;

/// Builder configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NNDescentParams {
    /// Out-degree of the resulting graph.
    pub k: usize,
    /// Fraction of unprocessed neighbors sampled per round, in `]0, 1]`.
    pub rho: f64,
    /// Stop once a round updates at most `delta * n * k` lists, in `]0, 1[`.
    pub delta: f64,
    /// Hard cap on rounds.
    pub max_iterations: usize,
    /// Seed for sampling. The resulting graph inherits it.
    pub seed: Option<u64>,
}

impl Default for NNDescentParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            rho: DEFAULT_RHO,
            delta: DEFAULT_DELTA,
            max_iterations: usize::MAX,
            seed: None,
        }
    }
}

impl NNDescentParams {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_rho(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(KnnError::invalid("k must be at least 1"));
        }
        if !(self.rho > 0.0 && self.rho <= 1.0) {
            return Err(KnnError::invalid(format!(
                "rho must be in ]0, 1], got {}",
                self.rho
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(KnnError::invalid(format!(
                "delta must be in ]0, 1[, got {}",
                self.delta
            )));
        }
        if self.max_iterations == 0 {
            return Err(KnnError::invalid("max_iterations must be at least 1"));
        }
        Ok(())
    }

    /// Per-node sample size, `ceil(rho * k)`, at least 1.
    fn sample_size(&self) -> usize {
        ((self.rho * self.k as f64).ceil() as usize).max(1)
    }

    /// A round with at most this many updates ends the build.
    fn threshold(&self, n: usize) -> f64 {
        self.delta * n as f64 * self.k as f64
    }
}

/// What a build did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Rounds run (0 for the complete-graph case).
    pub iterations: usize,
    /// Similarity computations, bootstrap included.
    pub similarities: usize,
    /// The `delta` threshold was reached before `max_iterations`.
    pub converged: bool,
}

/// Anything that turns nodes into a k-nn graph.
pub trait GraphBuilder<K, V, S> {
    /// Build the graph and report what it cost.
    fn build_with_stats(
        &self,
        nodes: Vec<Node<K, V>>,
        similarity: S,
    ) -> Result<(KnnGraph<K, V, S>, BuildStats)>;

    /// Build the graph.
    fn build(&self, nodes: Vec<Node<K, V>>, similarity: S) -> Result<KnnGraph<K, V, S>> {
        self.build_with_stats(nodes, similarity).map(|(g, _)| g)
    }
}

/// Successful list updates and similarity computations of a join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct JoinCounts {
    pub updates: usize,
    pub similarities: usize,
}

impl AddAssign for JoinCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.updates += rhs.updates;
        self.similarities += rhs.similarities;
    }
}

pub(crate) type Candidates = SmallVec<[NodeId; 32]>;

/// Old/new candidate sets of one round, indexed by node.
pub(crate) struct RoundSamples {
    pub new: Vec<Candidates>,
    pub old: Vec<Candidates>,
}

pub(crate) fn build_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Reject inputs that repeat a key, before any similarity is computed.
pub(crate) fn check_unique_keys<K, V>(nodes: &[Node<K, V>]) -> Result<()>
where
    K: Eq + Hash + fmt::Debug,
{
    let mut seen = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !seen.insert(&node.key) {
            return Err(KnnError::duplicate(&node.key));
        }
    }
    Ok(())
}

/// Every node linked to every other. For `n <= k + 1`.
pub(crate) fn complete_graph<K, V, S>(
    nodes: &[Node<K, V>],
    k: usize,
    similarity: &S,
) -> (Vec<NeighborList>, usize)
where
    S: Similarity<V>,
{
    let n = nodes.len();
    let mut lists: Vec<NeighborList> = (0..n).map(|_| NeighborList::new(k)).collect();
    let mut computed = 0;
    for a in 0..n {
        for b in (a + 1)..n {
            let s = similarity.similarity(&nodes[a].value, &nodes[b].value);
            computed += 1;
            lists[a].add(Neighbor::new(b, s));
            lists[b].add(Neighbor::new(a, s));
        }
    }
    (lists, computed)
}

/// `k` distinct random neighbors per node, self excluded. Needs `n > k`.
pub(crate) fn bootstrap<K, V, S>(
    nodes: &[Node<K, V>],
    k: usize,
    similarity: &S,
    rng: &mut StdRng,
) -> (Vec<NeighborList>, usize)
where
    S: Similarity<V>,
{
    let n = nodes.len();
    debug_assert!(n > k);
    let mut computed = 0;
    let lists = (0..n)
        .map(|v| {
            let mut list = NeighborList::new(k);
            for j in index::sample(&mut *rng, n - 1, k).iter() {
                let other = if j >= v { j + 1 } else { j };
                let s = similarity.similarity(&nodes[v].value, &nodes[other].value);
                computed += 1;
                list.add(Neighbor::new(other, s));
            }
            list
        })
        .collect();
    (lists, computed)
}

/// Steps 1 to 3 of a round: old/new split, reverse sets, sampled union.
///
/// `processed` holds `(node, neighbor)` edges already picked as new in an
/// earlier round; it is updated with this round's picks.
pub(crate) fn sample_round<F>(
    n: usize,
    mut neighbors_of: F,
    processed: &mut HashSet<(NodeId, NodeId)>,
    sample_size: usize,
    rng: &mut StdRng,
) -> RoundSamples
where
    F: FnMut(NodeId) -> SmallVec<[NodeId; 16]>,
{
    let mut new: Vec<Candidates> = Vec::with_capacity(n);
    let mut old: Vec<Candidates> = Vec::with_capacity(n);

    for v in 0..n {
        let mut fresh = Candidates::new();
        let mut seen = Candidates::new();
        for u in neighbors_of(v) {
            if processed.contains(&(v, u)) {
                seen.push(u);
            } else {
                fresh.push(u);
            }
        }
        fresh.shuffle(rng);
        fresh.truncate(sample_size);
        for &u in &fresh {
            processed.insert((v, u));
        }
        new.push(fresh);
        old.push(seen);
    }

    let mut new_reverse: Vec<Candidates> = vec![Candidates::new(); n];
    let mut old_reverse: Vec<Candidates> = vec![Candidates::new(); n];
    for v in 0..n {
        for &u in &new[v] {
            new_reverse[u].push(v);
        }
        for &u in &old[v] {
            old_reverse[u].push(v);
        }
    }

    for v in 0..n {
        union_sampled(&mut new[v], &mut new_reverse[v], sample_size, rng);
        union_sampled(&mut old[v], &mut old_reverse[v], sample_size, rng);
        let picked = &new[v];
        old[v].retain(|u| !picked.contains(u));
    }

    RoundSamples { new, old }
}

fn union_sampled(into: &mut Candidates, from: &mut Candidates, size: usize, rng: &mut StdRng) {
    if from.len() > size {
        from.shuffle(rng);
        from.truncate(size);
    }
    for &u in from.iter() {
        if !into.contains(&u) {
            into.push(u);
        }
    }
}

/// Step 4 for one node: every pair from `new x new` (once) and `new x old`.
#[inline]
pub(crate) fn local_join<F>(new: &[NodeId], old: &[NodeId], mut pair: F)
where
    F: FnMut(NodeId, NodeId),
{
    for (i, &u1) in new.iter().enumerate() {
        for &u2 in &new[i + 1..] {
            pair(u1, u2);
        }
        for &u2 in old {
            if u1 != u2 {
                pair(u1, u2);
            }
        }
    }
}

fn log_round(iteration: usize, counts: JoinCounts, threshold: f64, similarities: usize) {
    debug!(
        iteration,
        updates = counts.updates,
        threshold,
        similarities,
        "nndescent round"
    );
}

fn log_finished(n: usize, k: usize, stats: &BuildStats) {
    if !stats.converged && stats.iterations > 0 {
        warn!(
            iterations = stats.iterations,
            "nndescent reached max_iterations before the delta threshold"
        );
    }
    info!(
        nodes = n,
        k,
        iterations = stats.iterations,
        similarities = stats.similarities,
        converged = stats.converged,
        "nndescent build finished"
    );
}
