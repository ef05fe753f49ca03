//! Single-threaded NNDescent.

use super::{
    bootstrap, build_rng, check_unique_keys, complete_graph, local_join, log_finished, log_round,
    sample_round, BuildStats, GraphBuilder, JoinCounts, NNDescentParams,
};
use crate::error::Result;
use crate::graph::knn::{KnnGraph, Node};
use crate::graph::neighbors::Neighbor;
use crate::progress::{report, Phase, ProgressCallback, ProgressEvent};
use crate::similarity::Similarity;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// NNDescent with the local join on the calling thread.
///
/// With a seed the build is fully reproducible.
///
/// ```
/// use knn_graph::nndescent::{GraphBuilder, NNDescent, NNDescentParams};
/// use knn_graph::graph::Node;
///
/// let nodes: Vec<Node<u32, f64>> = (0..200).map(|i| Node::new(i, i as f64)).collect();
/// let builder = NNDescent::new(NNDescentParams::new(8).with_seed(42)).unwrap();
/// let graph = builder
///     .build(nodes, |a: &f64, b: &f64| 1.0 / (1.0 + (a - b).abs()))
///     .unwrap();
/// assert_eq!(graph.len(), 200);
/// assert_eq!(graph.neighbors(&17).unwrap().len(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct NNDescent {
    params: NNDescentParams,
    progress: Option<ProgressCallback>,
}

impl NNDescent {
    /// Fails with `InvalidParameter` if `params` do not validate.
    pub fn new(params: NNDescentParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            progress: None,
        })
    }

    /// Call `callback` after every round.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn params(&self) -> &NNDescentParams {
        &self.params
    }
}

impl<K, V, S> GraphBuilder<K, V, S> for NNDescent
where
    K: Eq + Hash + Clone + fmt::Debug,
    S: Similarity<V>,
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

        let mut rng = build_rng(params.seed);
        let (mut lists, computed) = bootstrap(&nodes, k, &similarity, &mut rng);
        stats.similarities = computed;

        let sample_size = params.sample_size();
        let threshold = params.threshold(n);
        let mut processed = HashSet::with_capacity(n * k);

        for iteration in 1..=params.max_iterations {
            let samples = sample_round(
                n,
                |v| lists[v].nodes(),
                &mut processed,
                sample_size,
                &mut rng,
            );

            let mut counts = JoinCounts::default();
            for v in 0..n {
                local_join(&samples.new[v], &samples.old[v], |u1, u2| {
                    let s = similarity.similarity(&nodes[u1].value, &nodes[u2].value);
                    counts.similarities += 1;
                    if lists[u1].add(Neighbor::new(u2, s)) {
                        counts.updates += 1;
                    }
                    if lists[u2].add(Neighbor::new(u1, s)) {
                        counts.updates += 1;
                    }
                });
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
        let graph = KnnGraph::from_parts(k, similarity, nodes, lists, params.seed)?;
        Ok((graph, stats))
    }
}
