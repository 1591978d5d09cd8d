//! Pluggable similarity strategies.
//!
//! The engine never computes meaning itself; it asks an injected
//! [`SimilarityComparator`] how close two feature vectors are.

use crate::types::{CollectiveError, Result};

/// Scores how similar two feature vectors are.
///
/// Implementations must be pure: the same inputs always produce the same
/// score. Scores are expected in `[0, 1]`; the engine clamps values above 1
/// and treats NaN as a failed comparison.
pub trait SimilarityComparator: Send + Sync {
    fn compare(&self, a: &[f32], b: &[f32]) -> Result<f64>;
}

impl<F> SimilarityComparator for F
where
    F: Fn(&[f32], &[f32]) -> Result<f64> + Send + Sync,
{
    fn compare(&self, a: &[f32], b: &[f32]) -> Result<f64> {
        self(a, b)
    }
}

/// Cosine similarity over equal-length vectors. Negative cosines score 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineSimilarity;

impl SimilarityComparator for CosineSimilarity {
    fn compare(&self, a: &[f32], b: &[f32]) -> Result<f64> {
        if a.len() != b.len() {
            return Err(CollectiveError::Comparison(format!(
                "dimension mismatch: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        Ok(cosine_similarity(a, b).max(0.0))
    }
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Run a comparator and normalize its output into `[0, 1]`.
pub(crate) fn normalized_score(
    comparator: &dyn SimilarityComparator,
    a: &[f32],
    b: &[f32],
) -> Result<f64> {
    let score = comparator.compare(a, b)?;
    if score.is_nan() {
        return Err(CollectiveError::Comparison("comparator returned NaN".to_string()));
    }
    Ok(score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_comparator_rejects_mismatched_dimensions() {
        let err = CosineSimilarity.compare(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, CollectiveError::Comparison(_)));
    }

    #[test]
    fn test_opposite_vectors_score_zero() {
        let score = CosineSimilarity.compare(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_closure_comparator_is_normalized() {
        let generous = |_: &[f32], _: &[f32]| -> Result<f64> { Ok(1.7) };
        assert_eq!(normalized_score(&generous, &[], &[]).unwrap(), 1.0);

        let broken = |_: &[f32], _: &[f32]| -> Result<f64> { Ok(f64::NAN) };
        assert!(normalized_score(&broken, &[], &[]).is_err());
    }
}
