//! Embedding vector helpers.

use crate::error::{DedupError, Result};

/// L2-normalize `vector`.
///
/// Returns `None` for empty vectors, vectors with a non-finite component, and
/// zero vectors, so that a missing embedding is never mistaken for a real one.
pub fn l2_normalize(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let norm = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return None;
    }
    Some(vector.iter().map(|v| (*v as f64 / norm) as f32).collect())
}

/// Cosine similarity of two L2-normalized vectors (their dot product).
///
/// Fails with `SimilarityCompute` when the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(DedupError::similarity(format!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let dot = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum::<f64>();
    Ok(dot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_rejects_degenerate() {
        assert!(l2_normalize(&[]).is_none());
        assert!(l2_normalize(&[0.0, 0.0, 0.0]).is_none());
        assert!(l2_normalize(&[1.0, f32::NAN]).is_none());
    }

    #[test]
    fn test_cosine_self_is_one() {
        let v = l2_normalize(&[0.3, -1.2, 4.5, 0.01]).unwrap();
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_symmetric() {
        let v = l2_normalize(&[1.0, 2.0, 3.0]).unwrap();
        let w = l2_normalize(&[-2.0, 0.5, 1.0]).unwrap();
        assert_eq!(cosine_similarity(&v, &w).unwrap(), cosine_similarity(&w, &v).unwrap());
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, DedupError::SimilarityCompute { .. }));
    }
}
