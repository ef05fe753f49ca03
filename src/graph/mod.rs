//! The k-nn graph and everything that reads or edits it after construction.
//!
//! - [`neighbors`]: bounded neighbor lists, the unit every node owns
//! - [`knn`]: [`KnnGraph`], node arena plus key index
//! - [`search`]: GNNS approximate search and the exhaustive fallback
//! - [`online`]: `fast_add`, `fast_remove`, sliding window
//!
//! Construction from scratch lives in [`crate::nndescent`].
//!
//! # Cost model
//!
//! Everything is counted in similarity computations, the one operation the
//! caller pays for. Searches take a `speedup`: the ratio between a
//! brute-force scan (`len` computations) and the budget the search may use.

pub mod knn;
pub mod neighbors;
pub mod online;
pub mod search;

pub use knn::{KnnGraph, Node};
pub use neighbors::{Neighbor, NeighborList, NodeId, SharedNeighborList};
pub use online::{InsertStats, OnlineParams, RemoveStats, DEFAULT_UPDATE_DEPTH};
pub use search::{
    SearchParams, SearchStats, DEFAULT_SEARCH_EXPANSION, DEFAULT_SEARCH_LONG_JUMPS,
    DEFAULT_SEARCH_SPEEDUP,
};
