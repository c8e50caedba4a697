//! Vector math shared by the builder and the match engine.

/// A single embedding vector
pub type Embedding = Vec<f32>;

/// Norms below this are treated as zero.
pub const NORM_EPSILON: f64 = 1e-6;

/// Euclidean norm, accumulated in `f64`.
pub fn l2_norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt()
}

/// Scale a vector to unit length.
///
/// Returns `None` when the norm is below [`NORM_EPSILON`], so callers never divide by zero.
pub fn normalize(vector: &[f32]) -> Option<Embedding> {
    let norm = l2_norm(vector);
    if norm < NORM_EPSILON || !norm.is_finite() {
        return None;
    }
    Some(
        vector
            .iter()
            .map(|value| (f64::from(*value) / norm) as f32)
            .collect(),
    )
}

/// Whether the vector's norm is within [`NORM_EPSILON`] of one.
pub fn is_unit(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= NORM_EPSILON
}

/// Dot product of two equal-length vectors.
///
/// Equals cosine similarity when both inputs are unit vectors.
pub fn dot(left: &[f32], right: &[f32]) -> f32 {
    debug_assert_eq!(left.len(), right.len(), "dot product of unequal lengths");
    left.iter()
        .zip(right.iter())
        .map(|(lhs, rhs)| f64::from(*lhs) * f64::from(*rhs))
        .sum::<f64>() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < EPSILON
    }

    #[test]
    fn test_normalize_known_vector() {
        let unit = normalize(&[3.0, 4.0]).expect("non-zero vector");
        assert!(approx_eq(unit[0], 0.6));
        assert!(approx_eq(unit[1], 0.8));
        assert!(is_unit(&unit));
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert!(normalize(&[0.0, 0.0, 0.0]).is_none());
        assert!(normalize(&[1e-9, 0.0]).is_none());
        assert!(normalize(&[]).is_none());
    }

    #[test]
    fn test_normalize_rejects_non_finite() {
        assert!(normalize(&[f32::NAN, 1.0]).is_none());
        assert!(normalize(&[f32::INFINITY, 1.0]).is_none());
    }

    #[test]
    fn test_normalize_high_dimension_stays_unit() {
        let raw: Vec<f32> = (0..512).map(|idx| (idx as f32 * 0.37).sin() * 3.0).collect();
        let unit = normalize(&raw).expect("non-zero vector");
        assert!(is_unit(&unit), "norm was {}", l2_norm(&unit));
    }

    #[test]
    fn test_dot_of_unit_vectors_is_cosine() {
        let first = normalize(&[3.0, 4.0]).expect("non-zero");
        let second = normalize(&[4.0, 3.0]).expect("non-zero");
        assert!(approx_eq(dot(&first, &second), 0.96));
        assert!(approx_eq(dot(&first, &first), 1.0));
    }

    #[test]
    fn test_dot_opposite_vectors() {
        assert!(approx_eq(dot(&[1.0, 0.0], &[-1.0, 0.0]), -1.0));
        assert!(approx_eq(dot(&[1.0, 0.0], &[0.0, 1.0]), 0.0));
    }
}
