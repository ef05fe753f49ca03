//! Accuracy metrics.
//!
//! - Edge recall: fraction of an approximate graph's edges that are also in
//!   the exact graph
//! - Recall@k: fraction of the true k nearest neighbors a search returned

use crate::graph::KnnGraph;
use crate::similarity::Similarity;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Edges shared with `exact`, divided by the number of edges of `exact`.
///
/// Both graphs must hold the same keys. Returns 0.0 for an edgeless oracle.
pub fn edge_recall<K, V, S1, S2>(approx: &KnnGraph<K, V, S1>, exact: &KnnGraph<K, V, S2>) -> f64
where
    K: Eq + Hash + Clone + fmt::Debug,
    S1: Similarity<V>,
    S2: Similarity<V>,
{
    let total = exact.edge_count();
    if total == 0 {
        return 0.0;
    }
    approx.compare(exact) as f64 / total as f64
}

/// recall@k = |retrieved ∩ ground_truth| / k
///
/// Only the first `k` entries of each slice count.
pub fn recall_at_k<T>(ground_truth: &[T], retrieved: &[T], k: usize) -> f64
where
    T: Eq + Hash,
{
    if k == 0 || ground_truth.is_empty() {
        return 0.0;
    }
    let truth: HashSet<&T> = ground_truth.iter().take(k).collect();
    let hits = retrieved
        .iter()
        .take(k)
        .collect::<HashSet<&T>>()
        .intersection(&truth)
        .count();
    hits as f64 / k.min(truth.len()) as f64
}

/// Mean of [`recall_at_k`] over paired queries.
pub fn mean_recall<T>(ground_truths: &[Vec<T>], retrievals: &[Vec<T>], k: usize) -> f64
where
    T: Eq + Hash,
{
    if ground_truths.is_empty() {
        return 0.0;
    }
    let total: f64 = ground_truths
        .iter()
        .zip(retrievals)
        .map(|(gt, ret)| recall_at_k(gt, ret, k))
        .sum();
    total / ground_truths.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::{exact_knn_graph, line_nodes};
    use crate::similarity::inverse_abs_difference;

    #[test]
    fn test_recall_at_k() {
        assert_eq!(recall_at_k(&[1, 2, 3, 4], &[1, 2, 5, 6], 4), 0.5);
        assert_eq!(recall_at_k(&[1, 2, 3], &[3, 2, 1], 3), 1.0);
        assert_eq!(recall_at_k::<u32>(&[], &[1], 3), 0.0);
        assert_eq!(recall_at_k(&[1, 2], &[1, 2], 0), 0.0);
        // Only the first k retrieved entries count
        assert_eq!(recall_at_k(&[1, 2], &[9, 8, 1, 2], 2), 0.0);
    }

    #[test]
    fn test_short_ground_truth() {
        // Fewer true neighbors than k: recall is relative to what exists
        assert_eq!(recall_at_k(&[7], &[7, 8, 9], 3), 1.0);
    }

    #[test]
    fn test_mean_recall() {
        let truth = vec![vec![1, 2], vec![3, 4]];
        let got = vec![vec![1, 2], vec![3, 5]];
        assert_eq!(mean_recall(&truth, &got, 2), 0.75);
        assert_eq!(mean_recall::<u32>(&[], &[], 2), 0.0);
    }

    #[test]
    fn test_edge_recall_of_oracle_is_one() {
        let a = exact_knn_graph(line_nodes(30), 4, inverse_abs_difference).unwrap();
        let b = exact_knn_graph(line_nodes(30), 4, inverse_abs_difference).unwrap();
        assert_eq!(edge_recall(&a, &b), 1.0);
    }
}
