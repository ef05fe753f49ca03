//! End-to-end construction quality against the brute-force oracle.
//!
//! NNDescent is a converging heuristic: thresholds are means over several
//! seeded trials, not per-run guarantees.

use knn_graph::benchmark::{edge_recall, exact_knn_graph, line_nodes, random_vectors};
use knn_graph::nndescent::{GraphBuilder, NNDescent, NNDescentParams, ThreadedNNDescent};
use knn_graph::similarity::{inverse_abs_difference, VectorSimilarity};
use knn_graph::{KnnGraph, Node};

type Sim = fn(&i64, &i64) -> f64;

fn one_d_params(seed: u64) -> NNDescentParams {
    NNDescentParams::new(10)
        .with_rho(0.6)
        .with_delta(0.1)
        .with_max_iterations(10)
        .with_seed(seed)
}

fn assert_well_formed<K, V, S>(g: &KnnGraph<K, V, S>, k: usize)
where
    K: Eq + std::hash::Hash + Clone + std::fmt::Debug,
    S: knn_graph::Similarity<V>,
{
    for (key, list) in g.iter() {
        let own = g.id_of(key).unwrap();
        assert!(list.len() <= k);
        assert!(!list.contains(own), "self edge on {key:?}");
        for n in list.iter() {
            assert!(g.node(n.node).is_some(), "dangling edge from {key:?}");
        }
    }
}

#[test]
fn nndescent_converges_on_one_dimensional_data() {
    let nodes = line_nodes(2000);
    let exact = exact_knn_graph(nodes.clone(), 10, inverse_abs_difference as Sim).unwrap();

    let trials = 3;
    let mut total = 0.0;
    for seed in 0..trials {
        let (g, stats) = NNDescent::new(one_d_params(seed))
            .unwrap()
            .build_with_stats(nodes.clone(), inverse_abs_difference as Sim)
            .unwrap();
        assert!(stats.iterations <= 10);
        assert_well_formed(&g, 10);
        total += edge_recall(&g, &exact);
    }
    let mean = total / trials as f64;
    assert!(mean >= 0.8, "mean edge recall {mean}");
}

#[test]
fn small_inputs_are_complete_graphs() {
    for n in 1..=11u32 {
        let g = NNDescent::new(NNDescentParams::new(10).with_seed(1))
            .unwrap()
            .build(line_nodes(n), inverse_abs_difference as Sim)
            .unwrap();
        assert_eq!(g.len(), n as usize);
        for (key, list) in g.iter() {
            let own = g.value(key).unwrap();
            let mut got: Vec<(usize, u64)> = list
                .iter()
                .map(|nb| (nb.node, nb.similarity.to_bits()))
                .collect();
            got.sort_unstable();
            let mut expected: Vec<(usize, u64)> = g
                .nodes()
                .filter(|other| other.key != *key)
                .map(|other| {
                    let id = g.id_of(&other.key).unwrap();
                    (id, inverse_abs_difference(own, &other.value).to_bits())
                })
                .collect();
            expected.sort_unstable();
            assert_eq!(got, expected, "list of {key}");
        }
    }
}

#[test]
fn threaded_matches_sequential_over_trials() {
    let nodes = line_nodes(500);
    let exact = exact_knn_graph(nodes.clone(), 10, inverse_abs_difference as Sim).unwrap();

    let trials = 10;
    let mut threaded_total = 0.0;
    let mut sequential_total = 0.0;
    for seed in 0..trials {
        let threaded = ThreadedNNDescent::new(one_d_params(seed))
            .unwrap()
            .with_threads(Some(4))
            .unwrap()
            .build(nodes.clone(), inverse_abs_difference as Sim)
            .unwrap();
        for (_, list) in threaded.iter() {
            assert_eq!(list.len(), 10);
        }
        assert_well_formed(&threaded, 10);
        threaded_total += edge_recall(&threaded, &exact);

        let sequential = NNDescent::new(one_d_params(seed))
            .unwrap()
            .build(nodes.clone(), inverse_abs_difference as Sim)
            .unwrap();
        sequential_total += edge_recall(&sequential, &exact);
    }
    let threaded_mean = threaded_total / trials as f64;
    let sequential_mean = sequential_total / trials as f64;
    assert!(threaded_mean >= 0.75, "threaded mean {threaded_mean}");
    assert!(
        (threaded_mean - sequential_mean).abs() < 0.1,
        "threaded {threaded_mean} vs sequential {sequential_mean}"
    );
}

#[test]
fn builds_over_vectors_with_cosine() {
    let nodes = random_vectors(400, 8, 5);
    let exact = exact_knn_graph(nodes.clone(), 8, VectorSimilarity::Cosine).unwrap();
    let g = NNDescent::new(NNDescentParams::new(8).with_rho(1.0).with_seed(5))
        .unwrap()
        .build(nodes, VectorSimilarity::Cosine)
        .unwrap();
    assert_well_formed(&g, 8);
    let recall = edge_recall(&g, &exact);
    assert!(recall >= 0.8, "edge recall {recall}");
}

#[test]
fn string_keys_and_closure_similarity() {
    let nodes: Vec<Node<String, f64>> = (0..100u32)
        .map(|i| Node::new(format!("item-{i}"), f64::from(i) * 0.5))
        .collect();
    let g = ThreadedNNDescent::new(NNDescentParams::new(4).with_seed(9))
        .unwrap()
        .build(nodes, |a: &f64, b: &f64| -(a - b).abs())
        .unwrap();
    assert_eq!(g.len(), 100);
    assert_eq!(g.neighbors(&"item-50".to_string()).unwrap().len(), 4);
}
