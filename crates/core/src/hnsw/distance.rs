//! Distance metrics used by the HNSW graph.
//!
//! All metrics return a non-negative value where **lower is better** and are
//! commutative. The triangle inequality is not required.

use crate::hnsw::simd;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric used for vector similarity computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine distance: `1 - cosine_similarity`, normalizing on the fly. Range: \[0, 2\].
    #[default]
    Cosine,
    /// `1 - dot(a, b)`. Assumes both operands are unit length; fastest metric.
    DotProduct,
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    Euclidean,
}

impl DistanceMetric {
    /// Distance between two vectors.
    ///
    /// # Panics
    ///
    /// Panics when the operands have different lengths. Callers validate
    /// dimensions at the index boundary; a mismatch here is a bug.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(
            a.len(),
            b.len(),
            "distance operands must share one dimension"
        );
        match self {
            DistanceMetric::Cosine => (1.0 - simd::cosine_f32(a, b)).max(0.0),
            DistanceMetric::DotProduct => (1.0 - simd::dot_product_f32(a, b)).max(0.0),
            DistanceMetric::Euclidean => simd::euclidean_sq_f32(a, b),
        }
    }

    /// Short name used by the CLI and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::DotProduct => "dot",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "dot" | "dotproduct" | "dot_product" => Ok(DistanceMetric::DotProduct),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            other => Err(format!(
                "unknown distance metric '{other}' (expected cosine, dot or euclidean)"
            )),
        }
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = simd::dot_product_f32(v, v).sqrt();
    if norm > 1e-10 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_is_zero() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let d = DistanceMetric::Cosine.distance(&a, &a);
        assert!(d < 1e-6, "self-distance should be ~0, got {d}");
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let c = vec![-1.0, 0.0];
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &c) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let a = vec![1.0, 1.0, 0.0];
        let b = vec![10.0, 10.0, 0.0];
        assert!(DistanceMetric::Cosine.distance(&a, &b) < 1e-6);
    }

    #[test]
    fn test_dot_product_on_unit_vectors() {
        let mut a = vec![3.0, 4.0];
        let mut b = vec![4.0, 3.0];
        normalize(&mut a);
        normalize(&mut b);
        let d = DistanceMetric::DotProduct.distance(&a, &b);
        assert!((d - (1.0 - 0.96)).abs() < 1e-6, "got {d}");
        assert!(DistanceMetric::DotProduct.distance(&a, &a) < 1e-6);
    }

    #[test]
    fn test_euclidean_squared() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![3.0, 4.0, 0.0];
        let d = DistanceMetric::Euclidean.distance(&a, &b);
        assert!((d - 25.0).abs() < 1e-4, "squared euclidean should be 25, got {d}");
    }

    #[test]
    fn test_distances_are_non_negative() {
        let a = vec![0.6, 0.8];
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::DotProduct,
            DistanceMetric::Euclidean,
        ] {
            assert!(metric.distance(&a, &a) >= 0.0, "{metric} went negative");
        }
    }

    #[test]
    #[should_panic(expected = "share one dimension")]
    fn test_dimension_mismatch_panics() {
        DistanceMetric::Cosine.distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_metric_parse_roundtrip() {
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::DotProduct,
            DistanceMetric::Euclidean,
        ] {
            assert_eq!(metric.as_str().parse::<DistanceMetric>(), Ok(metric));
        }
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_normalize_zero_vector_untouched() {
        let mut z = vec![0.0f32; 4];
        normalize(&mut z);
        assert_eq!(z, vec![0.0; 4]);
    }
}
