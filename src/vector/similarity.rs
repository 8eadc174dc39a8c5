//! Cosine similarity over dense `f32` vectors.

/// Euclidean norm of `v`.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity of two equal-length vectors.
///
/// Precomputed magnitudes may be supplied to avoid recomputing them on hot paths. A
/// zero-magnitude operand scores `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32], mag_a: Option<f32>, mag_b: Option<f32>) -> f32 {
    let ma = mag_a.unwrap_or_else(|| magnitude(a));
    let mb = mag_b.unwrap_or_else(|| magnitude(b));
    if ma == 0.0 || mb == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (ma * mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v, None, None) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 5.0], None, None), 0.0);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0], None, None), 0.0);
    }

    #[test]
    fn precomputed_magnitude_matches() {
        let a = [1.0, 2.0, 2.0];
        let b = [2.0, 1.0, 2.0];
        let direct = cosine_similarity(&a, &b, None, None);
        let cached = cosine_similarity(&a, &b, Some(3.0), Some(3.0));
        assert!((direct - cached).abs() < 1e-6);
    }
}
