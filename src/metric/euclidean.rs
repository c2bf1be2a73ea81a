use super::{SimilarityConversion, MIN_WEIGHT};
use crate::dataset::FeatureVector;
use crate::error::ClusterError;
use ndarray::Array1;

/// Euclidean distance with one non-negative weight per feature
#[derive(Debug, Clone)]
pub struct WeightedEuclidean {
    pub(crate) weights: Array1<f64>,
    pub(crate) conversion: SimilarityConversion,
}

impl WeightedEuclidean {
    pub fn new(dim: usize, conversion: SimilarityConversion) -> Self {
        Self {
            weights: Array1::ones(dim),
            conversion,
        }
    }

    /// `sqrt(Σ w_i (a_i - b_i)²)`
    pub fn distance(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut sum = 0.0;
        a.zip_with(b, |i, x, y| {
            let diff = x - y;
            sum += self.weights[i] * diff * diff;
        })?;
        Ok(sum.sqrt())
    }

    pub fn similarity(&self, a: &FeatureVector, b: &FeatureVector) -> Result<f64, ClusterError> {
        Ok(self.conversion.convert(self.distance(a, b)?))
    }

    /// Unweighted squared difference per feature
    pub fn diff_components(
        &self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<Array1<f64>, ClusterError> {
        a.check_dim(self.weights.len())?;
        let mut components = Array1::zeros(self.weights.len());
        a.zip_with(b, |i, x, y| {
            let diff = x - y;
            components[i] = diff * diff;
        })?;
        Ok(components)
    }

    pub fn step_weight(&mut self, index: usize, delta: f64) {
        self.weights[index] = (self.weights[index] - delta).max(MIN_WEIGHT);
    }
}
