//! Vector math shared by the builder, centroid maintenance and routing.

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of two vectors of equal length.
///
/// Returns `0.0` when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal dimensions");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Squared Euclidean distance.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vectors must have equal dimensions");
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Arithmetic mean of `vectors`, accumulated in `f64`.
///
/// Returns `None` for an empty input.
pub fn mean<'a, I>(vectors: I, dims: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum = vec![0.0f64; dims];
    let mut count = 0usize;
    for v in vectors {
        debug_assert_eq!(v.len(), dims, "vectors must have equal dimensions");
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += f64::from(*x);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

/// Index and distance of the centre nearest to `point`.
///
/// Ties resolve to the lowest index. `centres` must be non-empty.
pub fn nearest(point: &[f32], centres: &[Vec<f32>]) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (i, c) in centres.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}
