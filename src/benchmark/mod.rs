//! Quality evaluation for approximate k-nn graphs.
//!
//! - **Oracle**: [`exact_knn_graph`], brute force, `n²` similarities
//! - **Accuracy**: edge recall against the oracle, recall@k for searches
//! - **Data**: synthetic node sets with a known neighbor structure
//!
//! Only tests and benches should build the oracle; it is the cost every
//! other part of the crate exists to avoid.

pub mod datasets;
pub mod metrics;

pub use datasets::{line_nodes, random_vectors, spaced_line_nodes};
pub use metrics::{edge_recall, mean_recall, recall_at_k};

use crate::error::{KnnError, Result};
use crate::graph::{KnnGraph, Neighbor, NeighborList, Node};
use crate::nndescent::check_unique_keys;
use crate::similarity::Similarity;
use rayon::prelude::*;
use std::fmt;
use std::hash::Hash;

/// Exact k-nn graph by comparing every pair.
///
/// Rows are computed in parallel, each row sequentially, so the result is
/// deterministic: on ties the node with the smaller index wins.
pub fn exact_knn_graph<K, V, S>(
    nodes: Vec<Node<K, V>>,
    k: usize,
    similarity: S,
) -> Result<KnnGraph<K, V, S>>
where
    K: Eq + Hash + Clone + fmt::Debug + Sync,
    V: Sync,
    S: Similarity<V> + Sync,
{
    if k == 0 {
        return Err(KnnError::invalid("k must be at least 1"));
    }
    check_unique_keys(&nodes)?;

    let lists: Vec<NeighborList> = (0..nodes.len())
        .into_par_iter()
        .map(|v| {
            let mut list = NeighborList::new(k);
            for (u, other) in nodes.iter().enumerate() {
                if u != v {
                    let s = similarity.similarity(&nodes[v].value, &other.value);
                    list.add(Neighbor::new(u, s));
                }
            }
            list
        })
        .collect();

    KnnGraph::from_parts(k, similarity, nodes, lists, None)
}
