//! NNDescent with the local join split over a rayon pool.
//!
//! Sampling (old/new split, reverse sets) stays on the calling thread; it is
//! cheap next to the join and keeps the round's samples read-only for the
//! workers. The node range is cut into one contiguous slice per worker. A
//! worker joins the samples of its own slice but updates the lists of any
//! node, so every list sits behind its own lock ([`SharedNeighborList`]).
//!
//! `pool.install` returns only when every slice is done: that is the round
//! barrier. A panicking worker aborts the build with
//! [`KnnError::WorkerFailure`]; no partial graph is returned.

use super::{
    bootstrap, build_rng, check_unique_keys, complete_graph, local_join, log_finished, log_round,
    sample_round, BuildStats, GraphBuilder, JoinCounts, NNDescentParams,
};
use crate::error::{KnnError, Result};
use crate::graph::knn::{KnnGraph, Node};
use crate::graph::neighbors::{Neighbor, SharedNeighborList};
use crate::progress::{report, Phase, ProgressCallback, ProgressEvent};
use crate::similarity::Similarity;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Multi-threaded NNDescent.
///
/// Produces graphs of the same quality as [`NNDescent`](super::NNDescent).
/// The order in which workers update a shared list varies between runs, so
/// seeded builds are reproducible in distribution only.
#[derive(Debug, Clone)]
pub struct ThreadedNNDescent {
    params: NNDescentParams,
    threads: Option<usize>,
    progress: Option<ProgressCallback>,
}

impl ThreadedNNDescent {
    /// Fails with `InvalidParameter` if `params` do not validate.
    pub fn new(params: NNDescentParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            threads: None,
            progress: None,
        })
    }

    /// Worker count; `None` uses the available parallelism.
    pub fn with_threads(mut self, threads: Option<usize>) -> Result<Self> {
        if threads == Some(0) {
            return Err(KnnError::invalid("threads must be at least 1"));
        }
        self.threads = threads;
        Ok(self)
    }

    /// Call `callback` after every round, from the calling thread.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn params(&self) -> &NNDescentParams {
        &self.params
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// `n` indices in `parts` contiguous, nearly equal, non-empty ranges.
fn split_ranges(n: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, n.max(1));
    let base = n / parts;
    let extra = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        if len > 0 {
            ranges.push(start..start + len);
        }
        start += len;
    }
    ranges
}

impl<K, V, S> GraphBuilder<K, V, S> for ThreadedNNDescent
where
    K: Eq + Hash + Clone + fmt::Debug + Sync,
    V: Sync,
    S: Similarity<V> + Sync,
{
    fn build_with_stats(
        &self,
        nodes: Vec<Node<K, V>>,
        similarity: S,
    ) -> Result<(KnnGraph<K, V, S>, BuildStats)> {
        check_unique_keys(&nodes)?;
        let params = &self.params;
        let n = nodes.len();
        let k = params.k;
        let mut stats = BuildStats::default();

        if n <= k + 1 {
            let (lists, computed) = complete_graph(&nodes, k, &similarity);
            stats.similarities = computed;
            stats.converged = true;
            log_finished(n, k, &stats);
            let graph = KnnGraph::from_parts(k, similarity, nodes, lists, params.seed)?;
            return Ok((graph, stats));
        }

        let threads = self.threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| KnnError::WorkerFailure {
                round: 0,
                message: e.to_string(),
            })?;

        let mut rng = build_rng(params.seed);
        let (lists, computed) = bootstrap(&nodes, k, &similarity, &mut rng);
        stats.similarities = computed;
        let lists: Vec<SharedNeighborList> =
            lists.into_iter().map(SharedNeighborList::new).collect();

        let sample_size = params.sample_size();
        let threshold = params.threshold(n);
        let slices = split_ranges(n, threads);
        let mut processed = HashSet::with_capacity(n * k);

        for iteration in 1..=params.max_iterations {
            let samples = sample_round(
                n,
                |v| lists[v].nodes(),
                &mut processed,
                sample_size,
                &mut rng,
            );

            let per_slice: Vec<JoinCounts> = pool.install(|| {
                slices
                    .par_iter()
                    .map(|range| {
                        catch_unwind(AssertUnwindSafe(|| {
                            let mut counts = JoinCounts::default();
                            for v in range.clone() {
                                local_join(&samples.new[v], &samples.old[v], |u1, u2| {
                                    let s = similarity
                                        .similarity(&nodes[u1].value, &nodes[u2].value);
                                    counts.similarities += 1;
                                    if lists[u1].add(Neighbor::new(u2, s)) {
                                        counts.updates += 1;
                                    }
                                    if lists[u2].add(Neighbor::new(u1, s)) {
                                        counts.updates += 1;
                                    }
                                });
                            }
                            counts
                        }))
                        .map_err(|payload| KnnError::from_panic(iteration, payload))
                    })
                    .collect::<Result<Vec<_>>>()
            })?;

            let mut counts = JoinCounts::default();
            for c in per_slice {
                counts += c;
            }

            stats.iterations = iteration;
            stats.similarities += counts.similarities;
            log_round(iteration, counts, threshold, stats.similarities);
            report(
                &self.progress,
                ProgressEvent {
                    phase: Phase::Build,
                    iteration,
                    updates: counts.updates,
                    similarities: stats.similarities,
                },
            );

            if counts.updates as f64 <= threshold {
                stats.converged = true;
                break;
            }
        }

        log_finished(n, k, &stats);
        let lists = lists
            .into_iter()
            .map(SharedNeighborList::into_inner)
            .collect();
        let graph = KnnGraph::from_parts(k, similarity, nodes, lists, params.seed)?;
        Ok((graph, stats))
    }
}
