//! knn-graph: approximate k-nearest-neighbor graphs over any similarity.
//!
//! Given items and a pairwise similarity `sim(a, b) -> f64`, builds a directed
//! graph linking every item to (approximately) its `k` most similar items,
//! without computing all `n²` pairs.
//!
//! - `nndescent/`: construction from scratch (sequential and threaded)
//! - `graph/`: the graph, GNNS search, online insert/remove/window
//! - `benchmark/`: exact oracle and recall metrics for evaluation
//!
//! ```rust
//! use knn_graph::graph::{Node, SearchParams};
//! use knn_graph::nndescent::{GraphBuilder, NNDescent, NNDescentParams};
//! use knn_graph::similarity::inverse_abs_difference;
//!
//! let nodes: Vec<Node<u32, i64>> = (0..1000).map(|i| Node::new(i, i as i64)).collect();
//! let builder = NNDescent::new(NNDescentParams::new(10).with_seed(7))?;
//! let mut graph = builder.build(nodes, inverse_abs_difference)?;
//!
//! let hits = graph.search(&500, &SearchParams::new(5))?;
//! assert_eq!(hits.len(), 5);
//!
//! graph.fast_add(5000, 250, 4.0)?;
//! graph.fast_remove(&3)?;
//! assert_eq!(graph.len(), 1000);
//! # Ok::<(), knn_graph::KnnError>(())
//! ```
//!
//! # Critical Nuances
//!
//! ## Similarity, not distance
//!
//! Higher is better everywhere. Wrap a distance `d` as `1 / (1 + d)` or `-d`.
//! NaN similarities are never stored.
//!
//! ## Directed edges
//!
//! `a -> b` does not imply `b -> a`. Every algorithm here offers a computed
//! similarity to both endpoints, which keeps the graph close to symmetric,
//! but nothing enforces it.
//!
//! ## Randomness
//!
//! Construction, search and maintenance are randomized. Seed the builder
//! (`NNDescentParams::with_seed`) or the graph (`KnnGraph::with_seed`) for
//! reproducible runs; quality claims are statistical.
//!
//! ## When brute force wins
//!
//! Small graphs (`n <= k + 1`) are built complete. A search whose budget
//! `len / speedup` would reach `len` scans exhaustively instead.

pub mod benchmark;
pub mod error;
pub mod graph;
pub mod nndescent;
pub mod progress;
pub mod similarity;

// Re-exports
pub use error::{KnnError, Result};
pub use graph::{KnnGraph, Neighbor, NeighborList, Node, NodeId, SearchParams};
pub use nndescent::{GraphBuilder, NNDescent, NNDescentParams, ThreadedNNDescent};
pub use progress::{Phase, ProgressCallback, ProgressEvent};
pub use similarity::{Similarity, VectorSimilarity};
