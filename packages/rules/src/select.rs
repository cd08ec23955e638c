//! Weighted random choice over matching rules.
//!
//! When several rules of one category match the same target, one is drawn
//! with probability proportional to its weight, renormalized over the
//! matching subset. Callers keep candidates in declaration order, so the
//! draw sequence is reproducible for a fixed seed.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

/// Draws an index with probability proportional to the given weights.
///
/// Non-positive and non-finite weights are treated as zero. Returns `None`
/// when the slice is empty or no weight is positive.
pub fn pick_weighted_index(rng: &mut impl Rng, weights: &[f64]) -> Option<usize> {
    let cleaned: Vec<f64> = weights
        .iter()
        .map(|&weight| {
            if weight.is_finite() && weight > 0.0 {
                weight
            } else {
                0.0
            }
        })
        .collect();
    let dist = WeightedIndex::new(&cleaned).ok()?;
    Some(dist.sample(rng))
}

/// Draws one item from `(weight, item)` candidates.
pub fn pick_weighted<'a, T>(rng: &mut impl Rng, candidates: &'a [(f64, T)]) -> Option<&'a T> {
    let weights: Vec<f64> = candidates.iter().map(|(weight, _)| *weight).collect();
    let idx = pick_weighted_index(rng, &weights)?;
    candidates.get(idx).map(|(_, item)| item)
}
