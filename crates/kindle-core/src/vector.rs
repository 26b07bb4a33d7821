//! Small dense-vector helpers for emotion and embedding vectors.
//!
//! Vectors of mismatched length are treated as incomparable rather than
//! truncated, so callers get `None` instead of a misleading similarity.

use crate::constants::EPSILON;

pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Cosine similarity in [-1, 1], or `None` for empty, zero-norm or
/// mismatched vectors.
pub fn cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let na = norm(a);
    let nb = norm(b);
    if na < EPSILON || nb < EPSILON {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let cos = dot / (na * nb);
    cos.is_finite().then(|| cos.clamp(-1.0, 1.0))
}

/// Mean of the given vectors. Vectors whose length differs from the first
/// one are skipped.
pub fn centroid<'a>(vectors: impl IntoIterator<Item = &'a [f64]>) -> Option<Vec<f64>> {
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;
    for v in iter {
        if v.len() != sum.len() {
            continue;
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
        count += 1;
    }
    let n = count as f64;
    sum.iter_mut().for_each(|s| *s /= n);
    Some(sum)
}

/// Clamp to `[lo, hi]`, mapping NaN to `lo` and infinities to the nearest bound.
pub fn clamp_finite(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() { lo } else { x.clamp(lo, hi) }
}

/// Jaccard overlap of two sorted id sets. Two empty sets overlap fully.
pub fn jaccard<T: Ord>(a: &std::collections::BTreeSet<T>, b: &std::collections::BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}
