//! Synthetic node sets.

use crate::graph::Node;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Keys `0..n`, values `0..n`. With [`inverse_abs_difference`] the true
/// neighbors of `i` are the integers closest to `i`.
///
/// [`inverse_abs_difference`]: crate::similarity::inverse_abs_difference
pub fn line_nodes(n: u32) -> Vec<Node<u32, i64>> {
    spaced_line_nodes(n, 1)
}

/// Keys `0..n`, values `0, spacing, 2 * spacing, ...`.
///
/// Leaves gaps to insert between existing values, e.g. odd values into an
/// even line.
pub fn spaced_line_nodes(n: u32, spacing: i64) -> Vec<Node<u32, i64>> {
    (0..n).map(|i| Node::new(i, i as i64 * spacing)).collect()
}

/// `n` vectors uniform in `[-1, 1]^dim`, keys `0..n`.
pub fn random_vectors(n: u32, dim: usize, seed: u64) -> Vec<Node<u32, Vec<f32>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let v = (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect();
            Node::new(i, v)
        })
        .collect()
}
