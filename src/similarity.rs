//! Similarity providers.
//!
//! Every algorithm in this crate is driven by a single pairwise function
//! `sim(a, b) -> f64` (higher = more similar). Its cost model is expressed in
//! "number of calls to this function", which is what builders, search and
//! maintenance report back.
//!
//! ## Contract
//!
//! - Symmetric by convention (not enforced).
//! - Finite for every pair of values in the graph.
//! - Side-effect free: the threaded builder and the exhaustive search call it
//!   concurrently from worker threads, so it must be `Sync` there.
//!
//! Any `Fn(&V, &V) -> f64` is a provider:
//!
//! ```rust
//! use knn_graph::similarity::Similarity;
//!
//! let sim = |a: &i64, b: &i64| 1.0 / (1.0 + (a - b).abs() as f64);
//! assert_eq!(sim.similarity(&3, &3), 1.0);
//! ```

/// Pairwise similarity between two node values.
pub trait Similarity<V: ?Sized> {
    /// Similarity of `a` and `b`. Higher means more similar.
    fn similarity(&self, a: &V, b: &V) -> f64;
}

impl<V: ?Sized, F> Similarity<V> for F
where
    F: Fn(&V, &V) -> f64,
{
    #[inline]
    fn similarity(&self, a: &V, b: &V) -> f64 {
        self(a, b)
    }
}

/// `1 / (1 + |a - b|)` on integers.
///
/// The canonical 1-D similarity: the exact k-nn of `x` are the integers
/// closest to `x`, which makes it a cheap oracle for quality tests.
#[inline]
pub fn inverse_abs_difference(a: &i64, b: &i64) -> f64 {
    1.0 / (1.0 + (a - b).unsigned_abs() as f64)
}

/// Stock similarities for dense `f32` vectors.
///
/// Vectors of mismatched dimension get similarity `f64::NEG_INFINITY`, so they
/// are never accepted into a neighbor list that already holds a real entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VectorSimilarity {
    /// Cosine similarity in `[-1, 1]`; zero vectors score 0.
    Cosine,
    /// `1 / (1 + ||a - b||)`, in `(0, 1]`.
    InverseL2,
    /// Raw inner product (for pre-normalized data).
    Dot,
}

impl<T: AsRef<[f32]>> Similarity<T> for VectorSimilarity {
    fn similarity(&self, a: &T, b: &T) -> f64 {
        let (a, b) = (a.as_ref(), b.as_ref());
        if a.len() != b.len() {
            return f64::NEG_INFINITY;
        }
        match self {
            VectorSimilarity::Cosine => cosine(a, b),
            VectorSimilarity::InverseL2 => 1.0 / (1.0 + l2(a, b)),
            VectorSimilarity::Dot => dot(a, b),
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

#[inline]
fn l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
