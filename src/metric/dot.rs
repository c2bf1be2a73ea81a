use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use ndarray::Array1;

/// Weighted dot product, optionally length-normalized (weighted cosine)
#[derive(Debug, Clone)]
pub struct WeightedDotProduct {
    pub(crate) weights: Array1<f64>,
    pub(crate) normalize: bool,
}

impl WeightedDotProduct {
    pub fn new(dim: usize, normalize: bool) -> Self {
        Self {
            weights: Array1::ones(dim),
            normalize,
        }
    }

    fn weighted_norm(&self, v: &FeatureVector) -> f64 {
        let mut sum = 0.0;
        v.for_each_value(|i, x| sum += self.weights[i] * x * x);
        sum.sqrt()
    }

    /// Normalizing denominator, 1 when either side has zero length
    fn denominator(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        if !self.normalize {
            return 1.0;
        }
        let length = self.weighted_norm(a) * self.weighted_norm(b);
        if length > 0.0 {
            length
        } else {
            1.0
        }
    }

    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut dot = 0.0;
        a.zip_with(b, |i, x, y| dot += self.weights[i] * x * y)?;
        Ok(dot / self.denominator(a, b))
    }

    /// `1 - similarity`, zero for identical non-zero vectors under normalization
    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        Ok(1.0 - self.similarity(a, b)?)
    }

    /// Per-feature terms of the similarity, summing to `similarity(a, b)`
    pub fn diff_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        a.check_dim(self.weights.len())?;
        let denominator = self.denominator(a, b);
        let mut components = Array1::zeros(self.weights.len());
        a.zip_with(b, |i, x, y| {
            components[i] = self.weights[i] * x * y / denominator
        })?;
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_self_similarity() {
        let metric = WeightedDotProduct::new(3, true);
        let a = FeatureVector::dense(vec![1.0, 2.0, 3.0]);
        assert_relative_eq!(metric.similarity(&a, &a).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(metric.distance(&a, &a).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let metric = WeightedDotProduct::new(2, true);
        let a = FeatureVector::dense(vec![1.0, 0.0]);
        let b = FeatureVector::sparse(2, vec![(1, 5.0)]).unwrap();
        assert_relative_eq!(metric.similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_length_left_unnormalized() {
        let metric = WeightedDotProduct::new(2, true);
        let zero = FeatureVector::dense(vec![0.0, 0.0]);
        let b = FeatureVector::dense(vec![1.0, 1.0]);
        assert_eq!(metric.similarity(&zero, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_components_sum_to_similarity() {
        let metric = WeightedDotProduct::new(3, true);
        let a = FeatureVector::dense(vec![1.0, 2.0, 0.5]);
        let b = FeatureVector::dense(vec![0.3, 1.0, 2.0]);
        let components = metric.diff_components(&a, &b).unwrap();
        assert_relative_eq!(
            components.sum(),
            metric.similarity(&a, &b).unwrap(),
            epsilon = 1e-12
        );
    }
}
